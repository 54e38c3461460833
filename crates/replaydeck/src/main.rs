//! replaydeck CLI entry point

use clap::Parser;
use replaydeck::cli::{Cli, EXIT_FETCH, EXIT_OK, exit_code_for, render_error};
use replaydeck::{commands, logging};

fn main() {
    // Tracing may not be installed (or may be the thing that broke), so
    // panics go straight to stderr.
    #[allow(clippy::print_stderr)]
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = Cli::parse();
    std::process::exit(run_with_tokio(&cli));
}

/// Create the tokio runtime and run the command
fn run_with_tokio(cli: &Cli) -> i32 {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            }
            return EXIT_FETCH;
        }
    };

    rt.block_on(run(cli))
}

async fn run(cli: &Cli) -> i32 {
    if let Err(e) = logging::init_tracing(cli.log_level, cli.log_format) {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("{e:?}");
        }
    }

    match commands::execute(cli).await {
        Ok(output) => {
            print_output(&output, cli.json);
            EXIT_OK
        }
        Err(err) => {
            tracing::debug!(error = %err, "Command failed");
            render_error(&err, cli.json);
            exit_code_for(&err)
        }
    }
}

#[allow(clippy::print_stdout)]
fn print_output(output: &commands::Output, json: bool) {
    if json {
        match serde_json::to_string(output) {
            Ok(body) => println!("{body}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize output"),
        }
    } else {
        println!("{output}");
    }
}
