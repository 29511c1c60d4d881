use console::style;
use futures::FutureExt;

use super::{spinner, staging_store, target_name};
use crate::config::HarnessConfig;
use crate::connector::CommandResult;
use crate::error::{HarnessError, Result};
use crate::provider::create_provider;
use crate::session::with_session;
use crate::worker::plain_target_spec;

pub async fn execute(config: &HarnessConfig, command: &str) -> Result<()> {
    let provider = create_provider(config)?;
    let store = staging_store(config)?;
    let spec = plain_target_spec(&target_name("exec"), config);
    let policy = config.command_policy();
    let command = command.to_string();

    println!(
        "  {} {} {}",
        style("→").bold(),
        style(&spec.name).white().bold(),
        style(format!("({})", provider.name())).dim()
    );

    let outcome = with_session(provider, store, spec, move |session| {
        async move {
            let pb = spinner("Provisioned, running command...");
            let result = session.run_command(&command, policy).await;
            pb.finish_and_clear();
            result
        }
        .boxed()
    })
    .await;

    match outcome {
        Ok(result) => {
            print_output(&result);
            Ok(())
        }
        Err(HarnessError::CommandExecution { command, result }) => {
            print_output(&result);
            Err(HarnessError::CommandExecution { command, result })
        }
        Err(e) => Err(e),
    }
}

fn print_output(result: &CommandResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", style(&result.stderr).red());
    }
    let code = if result.success() {
        style(result.exit_code.to_string()).green()
    } else {
        style(result.exit_code.to_string()).red()
    };
    println!("  {} {}", style("exit").dim(), code);
}
