use iconx::{RuntimeConfig, load_image, process_io, run_image};
use std::env;
use std::io::Write;
use std::path::Path;
use std::process;

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: iconx <image.icx> [args...]");
        process::exit(2);
    };
    let program_args: Vec<String> = args.collect();

    let config = match RuntimeConfig::from_process_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let image = match load_image(Path::new(&path)) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let io = process_io(&config);
    match run_image(image, &program_args, &config, io) {
        Ok(report) => {
            log::debug!("collections: {}", report.gc.collections);
            process::exit(report.outcome.exit_code());
        }
        Err(e) => {
            eprint!("{e}");
            if !e.to_string().ends_with('\n') {
                eprintln!();
            }
            let _ = std::io::stderr().flush();
            if config.core_dump {
                process::abort();
            }
            process::exit(e.exit_code());
        }
    }
}
