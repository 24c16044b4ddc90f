use clap::Parser;
use pczt_cli_lib::{Cli, set_tracing_subscriber};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    set_tracing_subscriber(cli.log_level)?;
    match cli.run() {
        Ok(res) => {
            #[allow(clippy::print_stdout)]
            {
                println!("{res}");
            }
            Ok(())
        }
        Err(err) => {
            // Show the full error chain only when PCZT_DEBUG is set
            if std::env::var("PCZT_DEBUG").is_ok() {
                Err(err)
            } else {
                #[allow(clippy::print_stderr)]
                {
                    eprintln!("{err}");
                }
                std::process::exit(1);
            }
        }
    }
}
