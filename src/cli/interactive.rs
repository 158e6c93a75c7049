//! Interactive command handler — a single synchronous run for testing.

use anyhow::{anyhow, Result};

use triggerclaw::agent::RunState;

use super::common::{build_components, load_validated_config};

/// Run one instruction for one user and print the final reply (or the
/// failure reason).
pub(crate) async fn cmd_interactive(user: &str, instruction: &str) -> Result<()> {
    let config = load_validated_config()?;
    let components = build_components(&config, None);

    let mut session = components
        .sessions
        .get_or_create(user)
        .await
        .map_err(|e| anyhow!("could not create session: {}", e))?;

    let outcome = components.agent.run(&mut session, instruction, None).await;

    match outcome.state {
        RunState::Done => {
            match outcome.final_message {
                Some(message) => println!("{}", message),
                None => println!("(run completed without a reply)"),
            }
            Ok(())
        }
        RunState::Failed { reason } => {
            eprintln!("Run failed: {}", reason);
            Err(anyhow!("run failed: {}", reason))
        }
        RunState::Cancelled => Err(anyhow!("run cancelled")),
    }
}
