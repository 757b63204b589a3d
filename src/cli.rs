//! Command-line surface (§6.2): flag parsing and the single-invocation
//! dispatch order from §4.6.

use std::path::PathBuf;

use clap::Parser;

/// A single-file block-addressed archiver.
#[derive(Debug, Parser)]
#[command(name = "star", version, about)]
pub struct Cli {
    /// Create a new archive.
    #[arg(short = 'c', long = "create")]
    pub create: bool,

    /// Extract all files from the archive.
    #[arg(short = 'x', long = "extract")]
    pub extract: bool,

    /// List archive contents.
    #[arg(short = 't', long = "list")]
    pub list: bool,

    /// Delete named files from the archive.
    #[arg(short = 'd', long = "delete")]
    pub delete: bool,

    /// Replace named files in the archive with their current disk contents.
    #[arg(short = 'u', long = "update")]
    pub update: bool,

    /// Append named files (or standard input) to the archive.
    #[arg(short = 'r', long = "append")]
    pub append: bool,

    /// Defragment the archive.
    #[arg(short = 'p', long = "pack")]
    pub pack: bool,

    /// Increase logging verbosity; repeatable (first: debug, second: trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Use file arguments (as opposed to standard input) for create/append.
    #[arg(short = 'f', long = "file")]
    pub file: bool,

    /// Archive path, always the first positional argument.
    pub archive_path: PathBuf,

    /// Per-file targets for create/append/delete/update; ignored otherwise.
    pub targets: Vec<PathBuf>,
}

/// Which single primary operation (§4.6) was requested, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryOp {
    Create,
    Extract,
    Delete,
    Update,
    Append,
}

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("no operation requested: pass one of -c/-x/-t/-d/-u/-r/-p")]
    NoOperation,
    #[error("at most one of -c/-x/-d/-u/-r may be given at a time")]
    MultiplePrimaryOps,
}

impl Cli {
    /// The primary operation requested, per §4.6 ("at most one of {create,
    /// extract, delete, update, append}").
    pub fn primary_op(&self) -> Result<Option<PrimaryOp>, UsageError> {
        let candidates = [
            (self.create, PrimaryOp::Create),
            (self.extract, PrimaryOp::Extract),
            (self.delete, PrimaryOp::Delete),
            (self.update, PrimaryOp::Update),
            (self.append, PrimaryOp::Append),
        ];
        let mut found = candidates.into_iter().filter(|(flag, _)| *flag);
        let first = found.next().map(|(_, op)| op);
        if found.next().is_some() {
            return Err(UsageError::MultiplePrimaryOps);
        }
        Ok(first)
    }

    /// §4.6: reject invocations with no operation at all (create/extract/
    /// delete/update/append/pack/list all unset). Returns the validated
    /// primary operation so callers don't need to re-derive it afterwards.
    pub fn validate(&self) -> Result<Option<PrimaryOp>, UsageError> {
        let primary = self.primary_op()?;
        if primary.is_none() && !self.pack && !self.list {
            return Err(UsageError::NoOperation);
        }
        Ok(primary)
    }

    /// Target filenames for delete/update, collected as strings since the
    /// FAT indexes entries by name, not path.
    pub fn target_names(&self) -> Vec<String> {
        self.targets
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    /// Tracing filter level implied by `-v` repeat count.
    pub fn verbosity(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["star"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn create_is_the_sole_primary_op() {
        let cli = parse(&["-c", "-f", "archive.star", "a.txt"]);
        assert_eq!(cli.primary_op().unwrap(), Some(PrimaryOp::Create));
    }

    #[test]
    fn combining_two_primary_ops_is_a_usage_error() {
        let cli = parse(&["-c", "-x", "archive.star"]);
        assert!(matches!(cli.primary_op(), Err(UsageError::MultiplePrimaryOps)));
    }

    #[test]
    fn pack_alone_is_valid_with_no_primary_op() {
        let cli = parse(&["-p", "archive.star"]);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.primary_op().unwrap(), None);
    }

    #[test]
    fn no_operation_at_all_is_a_usage_error() {
        let cli = parse(&["archive.star"]);
        assert!(matches!(cli.validate(), Err(UsageError::NoOperation)));
    }

    #[test]
    fn verbosity_escalates_with_repeated_flag() {
        assert_eq!(parse(&["-t", "a.star"]).verbosity(), tracing::Level::INFO);
        assert_eq!(parse(&["-t", "-v", "a.star"]).verbosity(), tracing::Level::DEBUG);
        assert_eq!(parse(&["-t", "-vv", "a.star"]).verbosity(), tracing::Level::TRACE);
    }
}
