//! Implementation of the `prpflow prp` command.
//!
//! Parses a Markdown PRP document, prints the parsed PRP and its validation
//! report as JSON, and fails with a validation exit code when the document
//! is incomplete.

use crate::cli::PrpArgs;
use crate::context::FlowContext;
use crate::error::{FlowError, Result};
use crate::prp::{load_markdown_prp, validate_prp};
use serde_json::json;

pub fn cmd_prp(args: PrpArgs) -> Result<()> {
    let config = FlowContext::resolve()?.load_config()?;
    let prp = load_markdown_prp(&args.file)?;
    let report = validate_prp(&prp, config.prp.min_goal_words);

    let output = json!({ "prp": prp, "report": report });
    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|e| FlowError::UserError(format!("failed to render PRP: {}", e)))?;
    println!("{}", rendered);

    if report.is_valid {
        Ok(())
    } else {
        Err(FlowError::Validation(format!(
            "PRP '{}' is incomplete: {}",
            args.file.display(),
            report.errors.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes;
    use crate::test_support::DirGuard;
    use serial_test::serial;
    use tempfile::TempDir;

    const COMPLETE: &str = "\
## Goal
Add a CSV export endpoint for monthly reports

## Why
Finance reconciles reports in spreadsheets

## Implementation Blueprint
1. Add the export handler
2. Stream rows as CSV

## Validation Loop
```bash
cargo test export
```
";

    #[test]
    #[serial]
    fn test_complete_prp_passes() {
        let temp = TempDir::new().unwrap();
        let _guard = DirGuard::new(temp.path());
        let path = temp.path().join("export.md");
        std::fs::write(&path, COMPLETE).unwrap();

        cmd_prp(PrpArgs { file: path }).unwrap();
    }

    #[test]
    #[serial]
    fn test_incomplete_prp_is_validation_failure() {
        let temp = TempDir::new().unwrap();
        let _guard = DirGuard::new(temp.path());
        let path = temp.path().join("thin.md");
        std::fs::write(&path, "## Goal\nExport\n").unwrap();

        let err = cmd_prp(PrpArgs { file: path }).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::VALIDATION_FAILURE);
    }
}
