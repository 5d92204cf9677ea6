//! `codeindex` binary. All command logic lives in the `cli` module.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod cli;

fn main() {
    cli::run();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
