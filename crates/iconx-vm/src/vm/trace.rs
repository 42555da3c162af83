//! Procedure tracing (`&trace`), written to `&errout`.

use std::fmt::Write as _;

use super::*;

impl Vm {
    fn trace_line(&mut self, id: ProcId, message: impl FnOnce(&Vm, &mut String)) -> Result<(), Fault> {
        if self.k_trace > 0 {
            self.k_trace -= 1;
        }
        let mut out = String::new();
        let file = self.image.proc(id).map(|p| p.file.as_str()).unwrap_or("");
        if self.regs.line > 0 {
            let file: String = file.chars().take(10).collect();
            let _ = write!(out, "{file}: {}\t", self.regs.line);
        } else {
            out.push_str("\t\t");
        }
        for _ in 0..self.k_level.max(0) {
            out.push_str("| ");
        }
        if let Some(p) = self.image.proc(id) {
            out.push_str(&p.name);
        }
        message(self, &mut out);
        out.push('\n');
        self.write_errout(out.as_bytes())
    }

    /// Writes diagnostics to the `&errout` stream and flushes it.
    pub(crate) fn write_errout(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        if let Some(Stream::Writer(w)) = self.streams.get_mut(2) {
            let written = w.write_all(bytes).and_then(|()| w.flush());
            if let Err(err) = written {
                log::warn!("cannot write to &errout: {err}");
            }
        }
        Ok(())
    }

    pub(crate) fn ctrace(&mut self, id: ProcId, argp: u32, nargs: u32) -> Result<(), Fault> {
        let args = (1..=nargs)
            .map(|i| self.desc(argp + i))
            .collect::<Result<Vec<_>, _>>()?;
        self.trace_line(id, |vm, out| {
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                vm.outimage(out, *a, 0);
            }
            out.push(')');
        })
    }

    pub(crate) fn rtrace(&mut self, id: ProcId, v: Desc) -> Result<(), Fault> {
        self.trace_line(id, |vm, out| {
            out.push_str(" returned ");
            vm.outimage(out, v, 0);
        })
    }

    pub(crate) fn ftrace(&mut self, id: ProcId) -> Result<(), Fault> {
        self.trace_line(id, |_, out| out.push_str(" failed"))
    }

    pub(crate) fn strace(&mut self, id: ProcId, v: Desc) -> Result<(), Fault> {
        self.trace_line(id, |vm, out| {
            out.push_str(" suspended ");
            vm.outimage(out, v, 0);
        })
    }

    pub(crate) fn atrace(&mut self, id: ProcId) -> Result<(), Fault> {
        self.trace_line(id, |_, out| out.push_str(" resumed"))
    }
}
