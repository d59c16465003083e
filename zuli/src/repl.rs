use std::future::{self, Future};
use std::io::{self, Write};

use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use zuli_ble_controller::{CommandPipe, Registry};

use crate::command;
use crate::dispatch::{Flow, dispatch};

pub const PROMPT: &str = ">>> ";

/// Parses and runs one line. Errors are printed; they never end the session.
pub async fn handle_line<P, W>(registry: &Registry<P>, line: &str, out: &mut W) -> io::Result<Flow>
where
    P: CommandPipe,
    W: Write,
{
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(Flow::Continue);
    }
    let result = match command::parse(&tokens) {
        Ok(command) => dispatch(registry, command, out).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(flow) => Ok(flow),
        Err(e) => {
            debug!("{line:?}: {e:?}");
            writeln!(out, "{}", e.to_string().trim_end())?;
            Ok(Flow::Continue)
        }
    }
}

/// Reads commands until `quit`, end of input or `interrupt` resolves.
/// An interrupt abandons the command in progress.
pub async fn run<P, R, W>(
    registry: &Registry<P>,
    input: R,
    out: &mut W,
    interrupt: impl Future<Output = ()>,
) -> io::Result<()>
where
    P: CommandPipe,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let interrupted = tokio::select! {
        result = read_loop(registry, input, &mut *out) => {
            result?;
            false
        }
        () = interrupt => true,
    };
    if interrupted {
        debug!("interrupted");
        writeln!(out)?;
    }
    Ok(())
}

async fn read_loop<P, R, W>(registry: &Registry<P>, input: R, out: &mut W) -> io::Result<()>
where
    P: CommandPipe,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            return Ok(());
        };
        if handle_line(registry, &line, out).await? == Flow::Quit {
            return Ok(());
        }
    }
}
