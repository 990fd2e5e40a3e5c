use std::path::PathBuf;
use std::time::Duration;

use log::info;

use praxis_server::Coordinator;
use praxis_types::SessionParams;

const DEFAULT_PORT: u16 = 9123;

fn init_logging(verbose: bool) {
    use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .expect("Failed to initialize logger");
}

fn usage() -> ! {
    eprintln!(
        "usage: praxis-server --paramfile <file> --outdir <dir> [--port <n>] [--autostart] [--verbose]

    --paramfile, -p <file>  session parameter file (TOML)
    --outdir, -o <dir>      output directory for session artifacts
    --port <n>              listener port (default {})
    --autostart, -a         start as soon as every seat has logged in,
                            and auto-advance rounds
    --verbose, -v           debug logging",
        DEFAULT_PORT
    );
    std::process::exit(2);
}

fn arg_value(args: &[String], long: &str, short: Option<&str>) -> Option<String> {
    args.iter()
        .position(|a| a == long || short.is_some_and(|s| a == s))
        .and_then(|i| args.get(i + 1).cloned())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let Some(paramfile) = arg_value(&args, "--paramfile", Some("-p")) else {
        usage();
    };
    let Some(outdir) = arg_value(&args, "--outdir", Some("-o")) else {
        usage();
    };
    let port: u16 = match arg_value(&args, "--port", None) {
        Some(text) => match text.parse() {
            Ok(port) => port,
            Err(_) => usage(),
        },
        None => DEFAULT_PORT,
    };
    let autostart = args.iter().any(|a| a == "--autostart" || a == "-a");

    let params = match SessionParams::load(&PathBuf::from(&paramfile)) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("cannot load {}: {}", paramfile, e);
            std::process::exit(1);
        }
    };

    let coordinator = match Coordinator::new(params, PathBuf::from(&outdir)) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("cannot set up session: {}", e);
            std::process::exit(1);
        }
    };

    let addr = match coordinator.accept_connections(port) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("cannot listen on port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    info!("waiting for participants on {}", addr);

    if !autostart {
        info!("no --autostart: run the operator console to control this session");
    }

    // Wait indefinitely for all seats to log in.
    while !coordinator
        .run_state()
        .wait_start_enabled(Duration::from_secs(3600))
    {
        info!("still waiting for participants");
    }

    if autostart {
        coordinator.run_state().set_auto_advance(true);
        if let Err(e) = coordinator.start_session() {
            eprintln!("cannot start session: {}", e);
            std::process::exit(1);
        }
        while !coordinator
            .run_state()
            .wait_finished(Duration::from_secs(3600))
        {
            info!("session still in progress");
        }
        info!("session complete");
    } else {
        // The operator surface drives start/pause/next-round; keep the
        // process alive for it.
        loop {
            std::thread::park();
        }
    }
}
