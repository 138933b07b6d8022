use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    sync::Mutex,
};

use tgc_core::{ports::Confirmer, Result};

/// Asks on the terminal. Anything but `no` confirms; closed stdin declines.
pub struct StdinConfirmer {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinConfirmer {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinConfirmer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_confirmation(answer: &str) -> bool {
    !answer.trim().eq_ignore_ascii_case("no")
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut lines = self.lines.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("{prompt}\nDelete? (yes/no): ").as_bytes())
            .await?;
        stdout.flush().await?;

        match lines.next_line().await? {
            Some(answer) => Ok(is_confirmation(&answer)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_no_declines() {
        assert!(is_confirmation("yes"));
        assert!(is_confirmation(""));
        assert!(is_confirmation("y"));
        assert!(!is_confirmation("no"));
        assert!(!is_confirmation(" NO \n"));
    }
}
