use std::io::{self, BufRead, Write};

use slotform_agent::{ChatCompletionsClient, ModelSlotExtractor};
use slotform_core::config::{LlmProvider, LoadOptions};
use slotform_core::DialogEngine;
use tracing::{info, warn};

use super::{load_catalog, load_config, CommandResult};

const COMMAND: &str = "chat";

pub fn run(options: LoadOptions, business: Option<String>, no_model: bool) -> CommandResult {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_with_io(options, business, no_model, stdin.lock(), stdout.lock())
}

/// Runs one session until the engine signals exit or input ends.
pub fn run_with_io<R, W>(
    options: LoadOptions,
    business: Option<String>,
    no_model: bool,
    input: R,
    mut output: W,
) -> CommandResult
where
    R: BufRead,
    W: Write,
{
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    crate::init_logging(&config);
    let catalog = match load_catalog(COMMAND, &config) {
        Ok(catalog) => catalog,
        Err(result) => return result,
    };

    let line_id = business.unwrap_or_else(|| config.business.default_line.clone());
    let line = match catalog.get(&line_id) {
        Ok(line) => line,
        Err(error) => return CommandResult::from_error(COMMAND, error.into()),
    };

    let mut engine = DialogEngine::new(line);
    if !no_model {
        match ChatCompletionsClient::from_config(&config.llm) {
            Ok(Some(client)) => {
                let extractor = ModelSlotExtractor::new(client, catalog.clone())
                    .with_timeout_secs(config.llm.timeout_secs);
                engine = engine.with_model(Box::new(extractor));
            }
            Ok(None) => {}
            Err(error) => warn!(
                event_name = "cli.chat.model_unavailable",
                error = %error,
                "continuing without the model layer"
            ),
        }
    }
    info!(
        event_name = "cli.chat.started",
        business = %line_id,
        session_id = %engine.state().session_id,
        model = !no_model && config.llm.provider != LlmProvider::Disabled,
        "chat session started"
    );

    match converse(&mut engine, input, &mut output) {
        Ok(()) => CommandResult::quiet(),
        Err(error) => CommandResult::from_error(COMMAND, error.into()),
    }
}

fn converse<R: BufRead, W: Write>(
    engine: &mut DialogEngine,
    input: R,
    output: &mut W,
) -> io::Result<()> {
    writeln!(output, "{}\n", engine.initial_prompt())?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        let turn = engine.process_turn(line.trim_end_matches('\r'));
        writeln!(output, "{}\n", turn.response)?;
        output.flush()?;
        if turn.should_exit {
            break;
        }
    }
    Ok(())
}
