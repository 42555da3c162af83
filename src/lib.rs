#![forbid(unsafe_code)]

/// Environment knobs and their conversion into interpreter settings.
pub mod config;

pub use config::{ConfigError, RuntimeConfig};
pub use iconx_gc as gc;
pub use iconx_image as image;
pub use iconx_vm as vm;
pub use iconx_vm::{Outcome, RunError, RunReport, Vm, VmIo};

use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("`{path}` is not a valid image: {source}")]
    Decode {
        path: String,
        #[source]
        source: iconx_image::DecodeError,
    },
}

/// Reads and verifies an `.icx` image.
pub fn load_image(path: &Path) -> Result<iconx_image::Image, LoadError> {
    let display = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: display.clone(),
        source,
    })?;
    iconx_image::from_bytes(&bytes).map_err(|source| LoadError::Decode {
        path: display,
        source,
    })
}

/// The standard streams, with `&errout` buffered unless `unbuffered_errout` is set.
pub fn process_io(config: &RuntimeConfig) -> VmIo {
    let mut io = VmIo::stdio();
    if !config.unbuffered_errout {
        io.errout = Box::new(io::LineWriter::new(io::stderr()));
    }
    io
}

/// Loads `image` into a fresh interpreter and runs `main` with `args`.
pub fn run_image(
    image: iconx_image::Image,
    args: &[String],
    config: &RuntimeConfig,
    io: VmIo,
) -> Result<RunReport, RunError> {
    let mut vm = Vm::new(image, config.vm_config(), io)?;
    vm.run(args)
}
