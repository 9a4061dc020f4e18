use affex_experiment::ParticipantAction;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Clicks the agent every `every` until cancelled or the session stops listening.
pub async fn autoclick(
    every: Duration,
    tx: mpsc::Sender<ParticipantAction>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if tx.send(ParticipantAction::Target).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Autoclicker stopped");
}

/// Maps one input line to an action: blank or `agent` clicks the agent,
/// anything else names the page element that was clicked.
pub fn parse_line(line: &str) -> ParticipantAction {
    match line.trim() {
        "" | "agent" => ParticipantAction::Target,
        other => ParticipantAction::Page(other.to_string()),
    }
}

/// Forwards stdin lines as clicks from a plain thread, so a pending read
/// never holds the runtime open at exit.
pub fn spawn_stdin_reader(tx: mpsc::Sender<ParticipantAction>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(parse_line(&line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Stopped reading input: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lines_map_to_actions() {
        assert_eq!(parse_line(""), ParticipantAction::Target);
        assert_eq!(parse_line(" agent \n"), ParticipantAction::Target);
        assert_eq!(parse_line("background"), ParticipantAction::Page("background".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn autoclicker_keeps_its_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let task = tokio::spawn(autoclick(Duration::from_millis(500), tx, token.clone()));

        let mut at = Vec::new();
        for _ in 0..3 {
            rx.recv().await.unwrap();
            at.push(start.elapsed().as_millis());
        }
        token.cancel();
        task.await.unwrap();
        assert_eq!(at, vec![500, 1000, 1500]);
    }
}
