use std::io::Write;

use crate::log::error;
use crate::CallStackUnit;
use crate::ErrorExt as _;
use crate::Result;


/// The line emitted in place of further output when a call stack
/// unexpectedly resolved to nothing.
pub const INCONSISTENT_MARKER: &str = "*** internal error: call stack resolved to empty output ***";


/// The outcome of assembling the output of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Assembled {
    Complete,
    /// The unit with the given index had input, but no output.
    Inconsistent { unit: usize },
}


/// Write resolved call stacks to `sink`, in order.
///
/// Each call stack is preceded by its annotation, if any, and separated
/// from the previous one by an empty line.
pub(crate) fn assemble<W>(units: &[CallStackUnit], sink: &mut W) -> Result<Assembled>
where
    W: Write + ?Sized,
{
    let mut emitted = 0;

    for (idx, unit) in units.iter().enumerate() {
        let resolved = unit.resolved().unwrap_or_default();
        if resolved.is_empty() {
            if unit.text.trim().is_empty() {
                continue
            }

            error!(
                "call stack {idx} ({:?}) resolved to empty output; aborting",
                unit.key
            );
            let () = writeln!(sink, "{INCONSISTENT_MARKER}").context("failed to write output")?;
            return Ok(Assembled::Inconsistent { unit: idx })
        }

        if emitted > 0 {
            let () = writeln!(sink).context("failed to write output")?;
        }
        if let Some(annotation) = &unit.annotation {
            let () = writeln!(sink, "{annotation}").context("failed to write output")?;
        }
        let () = writeln!(sink, "{resolved}").context("failed to write output")?;
        emitted += 1;
    }

    let () = sink.flush().context("failed to flush output")?;
    Ok(Assembled::Complete)
}
