use anyhow::Result;

use dmarcsift::app::App;
use dmarcsift::cli::Cli;
use dmarcsift::logging;

fn main() -> Result<()> {
    let cli = Cli::from_args();
    logging::init(cli.verbose);

    let code = App::run(&cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
