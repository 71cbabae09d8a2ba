//! Binary entry point for `corekv-server`.
//!
//! Parses flags, installs the logger, seeds the keyed hash from the OS
//! RNG, binds the listener, wires the server into a reactor and runs the
//! main loop until SHUTDOWN (or a fatal setup error).

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use rand::RngCore;

use corekv::cli::Args;
use corekv::event::EventLoop;
use corekv::server::{self, Server};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    // The dict hash must be keyed before the first dict is built.
    let mut seed = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut seed);
    corekv::set_hash_seed(seed);

    let config = args.into_config();
    let setsize = config.setsize;

    let mut server = Server::new(config);
    server.listen().context("cannot bind listening socket")?;

    let mut el = EventLoop::new(setsize)
        .map_err(|e| anyhow::anyhow!("reactor setup failed: {e:?}"))?;
    let handle = Rc::new(RefCell::new(server));
    server::install(handle.clone(), &mut el)
        .map_err(|e| anyhow::anyhow!("reactor wiring failed: {e:?}"))?;

    el.run();
    log::info!("shutdown complete");
    Ok(())
}
