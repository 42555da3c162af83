//! The interpreter stack: frame markers, registers and descriptor slots.

use super::*;

/// Which code an instruction pointer runs through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Code {
    /// The synthetic startup sequence that calls `main` and then halts.
    Boot,
    Proc(ProcId),
}

/// An instruction pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Ipc {
    pub(crate) code: Code,
    pub(crate) pc: u32,
}

impl Ipc {
    pub(crate) const BOOT: Ipc = Ipc {
        code: Code::Boot,
        pc: 0,
    };
}

/// The interpreter registers: everything a frame saves and a co-expression switch swaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Regs {
    pub(crate) efp: Option<u32>,
    pub(crate) gfp: Option<u32>,
    pub(crate) pfp: Option<u32>,
    /// Slot of the callee descriptor of the active procedure; arguments follow it.
    pub(crate) argp: u32,
    pub(crate) ipc: Ipc,
    pub(crate) line: u32,
}

impl Regs {
    pub(crate) const BOOT: Regs = Regs {
        efp: None,
        gfp: None,
        pfp: None,
        argp: 0,
        ipc: Ipc::BOOT,
        line: 0,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExprFrame {
    /// Where control goes when the expression fails; `None` propagates failure outward.
    pub(crate) failure: Option<Ipc>,
    pub(crate) efp: Option<u32>,
    pub(crate) gfp: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ProcFrame {
    pub(crate) nargs: u32,
    pub(crate) nlocals: u32,
    pub(crate) caller: Regs,
}

#[derive(Debug)]
pub(crate) enum GenKind {
    /// A suspended builtin function or operator.
    Csusp { state: GenState, cargp: u32 },
    /// A suspended expression.
    Esusp,
    /// A suspended Icon procedure.
    Psusp { argp: u32, pfp: Option<u32> },
}

#[derive(Debug)]
pub(crate) struct GenFrame {
    pub(crate) kind: GenKind,
    pub(crate) efp: Option<u32>,
    pub(crate) gfp: Option<u32>,
    pub(crate) ipc: Ipc,
    pub(crate) line: u32,
}

/// One interpreter stack slot.
#[derive(Debug)]
pub(crate) enum Slot {
    D(Desc),
    Expr(ExprFrame),
    Proc(ProcFrame),
    Gen(Box<GenFrame>),
}

impl Slot {
    /// A copy of this slot for a duplicated stack region.
    ///
    /// Generator frames are never inside a copied region except as the boundary it starts after,
    /// so their copies are never resumed; the state is cloned anyway to keep regions exact.
    pub(crate) fn duplicate(&self) -> Slot {
        match self {
            Slot::D(d) => Slot::D(*d),
            Slot::Expr(f) => Slot::Expr(*f),
            Slot::Proc(f) => Slot::Proc(*f),
            Slot::Gen(g) => Slot::Gen(Box::new(GenFrame {
                kind: match &g.kind {
                    GenKind::Csusp { state, cargp } => GenKind::Csusp {
                        state: state.clone(),
                        cargp: *cargp,
                    },
                    GenKind::Esusp => GenKind::Esusp,
                    GenKind::Psusp { argp, pfp } => GenKind::Psusp {
                        argp: *argp,
                        pfp: *pfp,
                    },
                },
                efp: g.efp,
                gfp: g.gfp,
                ipc: g.ipc,
                line: g.line,
            })),
        }
    }
}

impl Trace for Slot {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self {
            Slot::D(d) => d.trace(tracer),
            Slot::Gen(g) => {
                if let GenKind::Csusp { state, .. } = &g.kind {
                    state.trace(tracer);
                }
            }
            Slot::Expr(_) | Slot::Proc(_) => {}
        }
    }
}

impl Relocate for Slot {
    fn relocate(&mut self, map: &Relocation) {
        match self {
            Slot::D(d) => d.relocate(map),
            Slot::Gen(g) => {
                if let GenKind::Csusp { state, .. } = &mut g.kind {
                    state.relocate(map);
                }
            }
            Slot::Expr(_) | Slot::Proc(_) => {}
        }
    }
}

impl Vm {
    pub(crate) fn push(&mut self, d: Desc) -> Result<(), Fault> {
        if self.stack.len() >= self.slot_limit as usize {
            return runerr_bare(301);
        }
        self.stack.push(Slot::D(d));
        Ok(())
    }

    pub(crate) fn push_slot(&mut self, slot: Slot) -> Result<(), Fault> {
        if self.stack.len() >= self.slot_limit as usize {
            return runerr_bare(301);
        }
        self.stack.push(slot);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Desc, Fault> {
        match self.stack.pop() {
            Some(Slot::D(d)) => Ok(d),
            Some(other) => syserr(format!("expected a descriptor on the stack, found {other:?}")),
            None => syserr("stack underflow"),
        }
    }

    pub(crate) fn top_index(&self) -> Result<u32, Fault> {
        match self.stack.len() {
            0 => syserr("stack underflow"),
            n => Ok((n - 1) as u32),
        }
    }

    pub(crate) fn top(&self) -> Result<Desc, Fault> {
        self.desc(self.top_index()?)
    }

    pub(crate) fn desc(&self, i: u32) -> Result<Desc, Fault> {
        match self.stack.get(i as usize) {
            Some(Slot::D(d)) => Ok(*d),
            Some(other) => syserr(format!("slot {i} holds {other:?}, not a descriptor")),
            None => syserr(format!("slot {i} is above the stack top")),
        }
    }

    pub(crate) fn set(&mut self, i: u32, d: Desc) -> Result<(), Fault> {
        match self.stack.get_mut(i as usize) {
            Some(slot @ Slot::D(_)) => {
                *slot = Slot::D(d);
                Ok(())
            }
            Some(other) => syserr(format!("slot {i} holds {other:?}, not a descriptor")),
            None => syserr(format!("slot {i} is above the stack top")),
        }
    }

    pub(crate) fn truncate(&mut self, len: u32) {
        self.stack.truncate(len as usize);
    }

    pub(crate) fn expr_frame(&self, i: u32) -> Result<ExprFrame, Fault> {
        match self.stack.get(i as usize) {
            Some(Slot::Expr(f)) => Ok(*f),
            other => syserr(format!("slot {i} is not an expression frame: {other:?}")),
        }
    }

    pub(crate) fn proc_frame(&self, i: u32) -> Result<ProcFrame, Fault> {
        match self.stack.get(i as usize) {
            Some(Slot::Proc(f)) => Ok(*f),
            other => syserr(format!("slot {i} is not a procedure frame: {other:?}")),
        }
    }

    pub(crate) fn current_efp(&self) -> Result<u32, Fault> {
        match self.regs.efp {
            Some(efp) => Ok(efp),
            None => syserr("no current expression frame"),
        }
    }

    pub(crate) fn current_pfp(&self) -> Result<u32, Fault> {
        match self.regs.pfp {
            Some(pfp) => Ok(pfp),
            None => syserr("no current procedure frame"),
        }
    }

    /// First slot of the stack region a suspension duplicates: just above the enclosing
    /// generator frame, else the enclosing expression frame, else the procedure's locals.
    pub(crate) fn region_start(
        &self,
        gfp: Option<u32>,
        efp: Option<u32>,
        pfp: Option<u32>,
    ) -> Result<u32, Fault> {
        if let Some(i) = gfp.or(efp) {
            return Ok(i + 1);
        }
        match pfp {
            Some(pfp) => {
                let frame = self.proc_frame(pfp)?;
                Ok(pfp + 1 + frame.nlocals)
            }
            None => Ok(0),
        }
    }

    /// Pushes a copy of the slots in `[start, end)`.
    pub(crate) fn copy_region(&mut self, start: u32, end: u32) -> Result<(), Fault> {
        let (start, end) = (start as usize, end as usize);
        if start > end || end > self.stack.len() {
            return syserr(format!("bad stack region {start}..{end}"));
        }
        if self.stack.len() + (end - start) > self.slot_limit as usize {
            return runerr_bare(301);
        }
        for i in start..end {
            let slot = self.stack[i].duplicate();
            self.stack.push(slot);
        }
        Ok(())
    }

    pub(crate) fn note_stack_depth(&mut self) {
        if let Some(m) = self.metrics.as_mut() {
            m.max_stack_len = m.max_stack_len.max(self.stack.len() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_start_prefers_generator_then_expression_frame() {
        let vm = Vm::new(Image::default(), VmConfig::default(), VmIo::null()).unwrap();
        assert_eq!(vm.region_start(Some(7), Some(3), None).unwrap(), 8);
        assert_eq!(vm.region_start(None, Some(3), None).unwrap(), 4);
        assert_eq!(vm.region_start(None, None, None).unwrap(), 0);
    }
}
