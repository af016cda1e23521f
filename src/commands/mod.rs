//! Command implementations for prpflow.
//!
//! Routes parsed CLI commands to their handlers. Only `run` needs the async
//! runtime; the rest are synchronous file operations.

mod init;
mod knowledge;
mod prp;
mod run;
mod status;
mod validate_cmd;

use crate::cli::Command;
use crate::error::Result;

pub async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Init(args) => init::cmd_init(args),
        Command::Validate(args) => validate_cmd::cmd_validate(args),
        Command::Run(args) => run::cmd_run(args).await,
        Command::Status(args) => status::cmd_status(args),
        Command::Prp(args) => prp::cmd_prp(args),
        Command::Knowledge(command) => knowledge::dispatch(command),
    }
}
