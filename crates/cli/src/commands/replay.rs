//! `turnloop replay` - Run a recorded session through the loop.

use std::path::Path;

use turnloop::{ReplayOptions, Session, replay};
use turnloop_config::LoopSettings;

pub async fn run(
    session_path: &Path,
    max_iterations: Option<u32>,
    no_delay: bool,
) -> turnloop_core::Result<()> {
    let settings = LoopSettings::load()?;
    let session = Session::from_file(session_path)?;
    tracing::debug!(
        path = %session_path.display(),
        messages = session.messages.len(),
        responses = session.responses.len(),
        "Loaded session"
    );

    let options = ReplayOptions {
        max_iterations,
        no_delay,
    };
    let outcome = replay(session, &settings, &options).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.messages)?);
    eprintln!(
        "stop reason: {} after {} iteration(s)",
        outcome.stop_reason, outcome.iterations
    );
    Ok(())
}
