use std::path::PathBuf;

use xeg_runtime::app::{self, RunOptions};

const HELP: &str = "XEG runtime: drives the X.com gallery command runtime from the terminal.

Usage: xeg-runtime [OPTIONS] [PAGE_URL]
       xeg-runtime --download <DIR> [STATUS_URL] <MEDIA_URL>...

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  --once                 Boot, wait for pending work, print the model as JSON
  --snapshot <FILE>      Read DOM facts from a local HTML file
  --config <FILE>        Use a specific config file
  --download <DIR>       Download media URLs into a ZIP archive in DIR

Without --once, newline-delimited JSON events are read from stdin until EOF.";

enum Mode {
    Run(RunOptions),
    Download {
        dir: PathBuf,
        urls: Vec<String>,
        config_file: Option<PathBuf>,
    },
    Exit,
}

fn main() {
    let mode = match parse_args(std::env::args().skip(1)) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    let outcome = match mode {
        Mode::Exit => return,
        Mode::Run(options) => app::run(options),
        Mode::Download {
            dir,
            urls,
            config_file,
        } => app::download(&dir, &urls, config_file),
    };

    if let Err(err) = outcome {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Mode, String> {
    let mut options = RunOptions::default();
    let mut download_dir: Option<PathBuf> = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("XEG runtime {}", xeg_runtime::VERSION);
                return Ok(Mode::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Mode::Exit);
            }
            "--once" => options.once = true,
            "--snapshot" => {
                let value = args.next().ok_or("--snapshot requires a file")?;
                options.snapshot = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = args.next().ok_or("--config requires a file")?;
                options.config_file = Some(PathBuf::from(value));
            }
            "--download" => {
                let value = args.next().ok_or("--download requires a directory")?;
                download_dir = Some(PathBuf::from(value));
            }
            flag if flag.starts_with('-') => return Err(format!("unknown flag {flag}")),
            other => positional.push(other.to_string()),
        }
    }

    if let Some(dir) = download_dir {
        if positional.is_empty() {
            return Err("--download needs at least one media URL".into());
        }
        return Ok(Mode::Download {
            dir,
            urls: positional,
            config_file: options.config_file,
        });
    }

    if positional.len() > 1 {
        return Err("expected at most one page URL".into());
    }
    options.url = positional.pop();
    Ok(Mode::Run(options))
}
