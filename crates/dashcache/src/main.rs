//! Dashcache.
//!
//! Dashcache caches dashboard query results on the client side, serving
//! fresh results instantly, expired results immediately while revalidating
//! them in the background, and falling back to the network only on a cold
//! read. This binary is the operator tooling around that cache: inspecting,
//! cleaning and clearing the on-disk state.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
