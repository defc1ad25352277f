#[macro_use]
extern crate tracing;

use std::env;
use std::io::{self, Write};

use anyhow::Context;
use cairn::backend::X11;
use cairn::cli::{Cli, Sub};
use cairn::frame_clock::{FrameClock, DEFAULT_REFRESH_RATE};
use cairn::state::{Options, State};
use cairn::utils::version;
use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, Mode, PostAction};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "cairn=debug";

#[cfg(feature = "profile-with-tracy-allocations")]
#[global_allocator]
static GLOBAL: tracy_client::ProfiledAllocator<std::alloc::System> =
    tracy_client::ProfiledAllocator::new(std::alloc::System, 100);

fn main() -> anyhow::Result<()> {
    if env::var_os("RUST_BACKTRACE").is_none() {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    if let Some(Sub::Completions { shell }) = cli.subcommand {
        clap_complete::generate(shell, &mut Cli::command(), "cairn", &mut io::stdout());
        return Ok(());
    }

    tracy_client::Client::start();

    info!("starting version {}", &version());

    let x11 = X11::connect(cli.display.as_deref())?;
    let fd = x11
        .as_fd()
        .try_clone_to_owned()
        .context("error duplicating the X connection fd")?;
    let clock = x11.clock();

    let options = Options {
        replace: cli.replace,
        composite: !cli.no_composite,
    };
    let mut state = State::new(x11.into(), options)?;

    if let Some(Sub::Windows { json }) = cli.subcommand {
        state.scan_windows()?;
        return print_windows(&state, json);
    }

    state
        .register_as_window_manager(options.replace)
        .context("error becoming the window manager")?;
    if options.composite {
        if let Err(err) = state.register_as_compositing_manager() {
            warn!("not compositing: {err}");
        }
    }
    state.scan_windows()?;

    let mut event_loop: EventLoop<State> =
        EventLoop::try_new().context("error creating the event loop")?;
    let handle = event_loop.handle();

    handle
        .insert_source(
            Generic::new(fd, Interest::READ, Mode::Level),
            |_, _, state| {
                state.dispatch_pending();
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| err.error)
        .context("error watching the X connection")?;

    let mut frame_clock = FrameClock::new(clock.clone(), DEFAULT_REFRESH_RATE);
    handle
        .insert_source(Timer::immediate(), move |_, _, state| {
            let _span = tracy_client::span!("repaint tick");
            frame_clock.ticked(clock.now());
            state.refresh();
            TimeoutAction::ToDuration(frame_clock.time_to_next_tick())
        })
        .map_err(|err| err.error)
        .context("error starting the repaint timer")?;

    let signal = event_loop.get_signal();
    event_loop
        .run(None, &mut state, |state| {
            if state.should_stop() {
                signal.stop();
            }
        })
        .context("error running the event loop")?;

    info!("exiting");
    Ok(())
}

fn print_windows(state: &State, json: bool) -> anyhow::Result<()> {
    let windows = state.windows();
    let mut stdout = io::stdout().lock();

    if json {
        serde_json::to_writer_pretty(&mut stdout, &windows).context("error formatting JSON")?;
        writeln!(stdout)?;
        return Ok(());
    }

    for window in windows {
        writeln!(stdout, "{window}")?;
    }
    Ok(())
}
