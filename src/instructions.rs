use anyhow::Result;
use std::io::{self, Write};

/// Text explaining how to provide a GitHub access token.
pub const INSTRUCTIONS: &str = include_str!("../assets/instructions.txt");

/// Print the access token setup instructions.
///
/// Printed by `expub instructions`, and by any command that needs a token
/// when neither `GITHUB_PAT` nor `GITHUB_TOKEN` is set.
///
/// # Errors
/// Returns an error if writing to `stdout` fails.
pub fn cmd_instructions() -> Result<()> {
    io::stdout().write_all(INSTRUCTIONS.as_bytes())?;
    Ok(())
}
