//! Co-expressions: creation, refreshing and transfers of control.
//!
//! The running co-expression's stack and registers live in the [`Vm`]; a switch parks them in
//! the co-expression's block and installs the target's.

use super::*;
use crate::block::{COEXPR_SIZE, DESC_BYTES, RefreshBlock, refresh_size};

impl Vm {
    /// `create e`: a co-expression that starts at `entry` in the current procedure with copies of
    /// its arguments and locals.
    pub(crate) fn create(&mut self, entry: u32) -> Result<(), Fault> {
        let pfp = self.current_pfp()?;
        let pf = self.proc_frame(pfp)?;
        let nargs = pf.nargs + 1;
        let stack_bytes = self.config.coexpr_stack_slots as usize * DESC_BYTES;
        self.reserve(Need {
            blocks: COEXPR_SIZE + refresh_size((nargs + pf.nlocals) as usize),
            strings: 0,
            statics: stack_bytes,
        })?;

        let argp = self.regs.argp;
        let mut elems = Vec::with_capacity((nargs + pf.nlocals) as usize);
        for i in 0..nargs {
            elems.push(self.desc(argp + i)?);
        }
        for i in 0..pf.nlocals {
            elems.push(self.desc(pfp + 1 + i)?);
        }
        let fresh = RefreshBlock {
            entry: Ipc {
                code: self.regs.ipc.code,
                pc: entry,
            },
            nargs: pf.nargs,
            nlocals: pf.nlocals,
            line: self.regs.line,
            elems,
        };
        let c = self.alc_coexpr(fresh, stack_bytes)?;
        if let Some(m) = self.metrics.as_mut() {
            m.coexprs_created += 1;
        }
        self.push(Desc::Coexpr(c))
    }

    /// Allocates a co-expression block and its refresh block; space must have been reserved.
    fn alc_coexpr(&mut self, fresh: RefreshBlock, stack_bytes: usize) -> Result<BlockRef, Fault> {
        let (stack, regs) = fresh_stack(&fresh);
        self.heap.reserve_static(stack_bytes)?;
        let refresh = self.heap.alloc(Block::Refresh(fresh))?;
        let c = self.heap.alloc(Block::Coexpr(Box::new(CoexprBlock {
            stack,
            regs,
            activator: None,
            size: 0,
            refresh: Some(refresh),
            tvalloc: None,
            slot_limit: self.config.coexpr_stack_slots,
            stack_bytes,
        })))?;
        log::debug!(
            "created co-expression {} with a {stack_bytes}-byte stack",
            c.index()
        );
        Ok(c)
    }

    /// `^e`: a new co-expression restarted from `c`'s refresh record.
    pub(crate) fn refresh(&mut self, c: BlockRef) -> Result<Desc, Fault> {
        let (refresh, nelems) = match self.coexpr(c)?.refresh {
            Some(r) => match self.block(r)? {
                Block::Refresh(f) => (r, f.elems.len()),
                _ => return syserr("refresh reference to a non-refresh block"),
            },
            None => return runerr(118, Desc::Coexpr(c)),
        };
        let stack_bytes = self.config.coexpr_stack_slots as usize * DESC_BYTES;
        let mut held = [Desc::Coexpr(c)];
        self.reserve_with(
            Need {
                blocks: COEXPR_SIZE + refresh_size(nelems),
                strings: 0,
                statics: stack_bytes,
            },
            &mut held,
        )?;
        let [Desc::Coexpr(c)] = held else {
            return syserr("held co-expression changed type");
        };
        let refresh = self.coexpr(c)?.refresh.unwrap_or(refresh);
        let Block::Refresh(f) = self.block(refresh)? else {
            return syserr("refresh reference to a non-refresh block");
        };
        let fresh = RefreshBlock {
            entry: f.entry,
            nargs: f.nargs,
            nlocals: f.nlocals,
            line: f.line,
            elems: f.elems.clone(),
        };
        let c = self.alc_coexpr(fresh, stack_bytes)?;
        if let Some(m) = self.metrics.as_mut() {
            m.coexprs_created += 1;
        }
        Ok(Desc::Coexpr(c))
    }

    /// Parks the running co-expression and installs `target`.
    fn switch_to(&mut self, target: BlockRef) -> Result<(), Fault> {
        self.coexpr(target)?;
        let stack = std::mem::take(&mut self.stack);
        let (regs, current) = (self.regs, self.current);
        let parked = self.coexpr_mut(current)?;
        parked.stack = stack;
        parked.regs = regs;
        let next = self.coexpr_mut(target)?;
        let stack = std::mem::take(&mut next.stack);
        let (regs, limit) = (next.regs, next.slot_limit);
        self.stack = stack;
        self.regs = regs;
        self.slot_limit = limit;
        self.current = target;
        if let Some(m) = self.metrics.as_mut() {
            m.coexpr_switches += 1;
        }
        log::trace!("switched to co-expression {}", target.index());
        Ok(())
    }

    /// `e1 @ e2`: the stack holds the transmitted value and the co-expression.
    pub(crate) fn coact(&mut self) -> Result<(), Fault> {
        let v = self.pop()?;
        let target = self.deref(v)?;
        let Desc::Coexpr(target) = target else {
            return runerr(118, target);
        };
        let tval_at = self.top_index()?;
        let tval = self.deref_if_local(self.desc(tval_at)?)?;
        if target == self.current {
            let v = self.deref(tval)?;
            return self.set(tval_at, v);
        }
        if self.coexpr(target)?.tvalloc.is_some() {
            return runerr_bare(214);
        }
        self.coexpr_mut(self.current)?.tvalloc = Some(tval_at);

        let from = self.current;
        let next = self.coexpr_mut(target)?;
        next.activator = Some(from);
        if let Some(at) = next.tvalloc.take() {
            if let Some(slot) = next.stack.get_mut(at as usize) {
                *slot = Slot::D(tval);
            }
        }
        self.switch_to(target)
    }

    /// Hands `v` (or failure, when `None`) back to the activator of the running co-expression.
    fn transfer_to_activator(&mut self, v: Option<Desc>) -> Result<(), Fault> {
        let current = self.current;
        let Some(activator) = self.coexpr(current)?.activator else {
            return syserr("co-expression return without an activator");
        };
        if v.is_some() {
            self.coexpr_mut(current)?.size += 1;
        }
        let back = self.coexpr_mut(activator)?;
        let at = back.tvalloc.take();
        if let (Some(v), Some(at)) = (v, at) {
            match back.stack.get_mut(at as usize) {
                Some(slot) => *slot = Slot::D(v),
                None => return syserr("activator stack lost its result slot"),
            }
            back.stack.truncate(at as usize + 1);
        }
        self.switch_to(activator)
    }

    /// Produces the value on top of the stack to the activator.
    pub(crate) fn coret(&mut self) -> Result<(), Fault> {
        let v = self.deref_if_local(self.top()?)?;
        self.transfer_to_activator(Some(v))
    }

    /// Fails back to the activator.
    pub(crate) fn cofail(&mut self) -> Result<(), Fault> {
        self.transfer_to_activator(None)?;
        self.efail()
    }
}

/// The initial stack of a co-expression: arguments, a procedure frame, locals and a slot for
/// the first transmitted value, which the entry code pops.
fn fresh_stack(f: &RefreshBlock) -> (Vec<Slot>, Regs) {
    let nargs = f.nargs as usize + 1;
    let mut stack = Vec::with_capacity(f.elems.len() + 2);
    stack.extend(f.elems[..nargs.min(f.elems.len())].iter().map(|d| Slot::D(*d)));
    let pfp = stack.len() as u32;
    stack.push(Slot::Proc(ProcFrame {
        nargs: f.nargs,
        nlocals: f.nlocals,
        caller: Regs::BOOT,
    }));
    stack.extend(f.elems[nargs.min(f.elems.len())..].iter().map(|d| Slot::D(*d)));
    stack.push(Slot::D(Desc::Null));
    let regs = Regs {
        efp: None,
        gfp: None,
        pfp: Some(pfp),
        argp: 0,
        ipc: f.entry,
        line: f.line,
    };
    (stack, regs)
}
