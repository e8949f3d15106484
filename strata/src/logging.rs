use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::Args;

/// Crates whose events follow a bare `--log-level`.
const STRATA_TARGETS: &[&str] = &[
    "strata",
    "strata_common",
    "strata_types",
    "strata_store",
    "strata_ingest",
    "strata_query",
];

pub fn init_logging(args: &Args) -> Result<()> {
    let filter = log_filter(&args.log_level)?;

    // stdout carries the JSON reports of the commands.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!args.log_no_ansi);

    if args.log_json {
        subscriber.json().flatten_event(true).init();
    } else {
        subscriber.compact().init();
    }

    Ok(())
}

/// Builds the event filter from the `--log-level` argument.
///
/// A bare level applies to the strata crates only, dependencies such as
/// sqlx stay at `warn`. Anything else is read as a full filter directive.
fn log_filter(level: &str) -> Result<EnvFilter> {
    let Ok(level) = LevelFilter::from_str(level) else {
        return EnvFilter::try_new(level).context("Parse log filter");
    };

    let mut filter = EnvFilter::new("warn");
    for target in STRATA_TARGETS {
        let directive = Directive::from_str(&format!("{target}={level}"))
            .context("Build strata log directive")?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scopes_to_strata() {
        let filter = log_filter("debug").unwrap().to_string().to_lowercase();
        assert!(filter.contains("strata_store=debug"), "{filter}");
        assert!(filter.contains("warn"), "{filter}");
        assert!(!filter.contains("sqlx"), "{filter}");
    }

    #[test]
    fn test_directives_pass_through() {
        let filter = log_filter("info,sqlx=debug").unwrap().to_string().to_lowercase();
        assert!(filter.contains("sqlx=debug"), "{filter}");
        assert!(log_filter("strata=loud").is_err());
    }
}
