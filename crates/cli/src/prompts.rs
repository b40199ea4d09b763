use std::io::{self, IsTerminal, Write};

use anyhow::{Result, bail};

/// Ask a yes/no question on stderr. `force` answers yes without asking.
///
/// Destructive generation commands call this; without a terminal they fail
/// instead of guessing.
pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }

  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to prompt without a terminal. Re-run with --force to proceed.");
  }

  let mut stderr = io::stderr().lock();
  write!(stderr, "{} [y/N] ", message)?;
  stderr.flush()?;
  drop(stderr);

  let mut answer = String::new();
  io::stdin().read_line(&mut answer)?;
  Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
  matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
