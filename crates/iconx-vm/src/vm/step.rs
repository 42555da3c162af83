//! The dispatch loop, frame instructions and failure propagation.

use iconx_image::Instruction;

use super::*;
use crate::Loc;

enum Flow {
    Continue,
    Quit,
}

impl Vm {
    /// Executes instructions until control returns to the startup sequence or `quit` runs.
    pub(crate) fn interp(&mut self) -> Result<Outcome, Fault> {
        loop {
            let ipc = self.regs.ipc;
            let Code::Proc(id) = ipc.code else {
                return Ok(Outcome::Normal);
            };
            let instr = match self.image.proc(id).and_then(|p| p.code.get(ipc.pc as usize)) {
                Some(instr) => instr.clone(),
                None => return syserr(format!("instruction pointer {ipc:?} is outside its code")),
            };
            self.regs.ipc.pc += 1;
            if let Some(m) = self.metrics.as_mut() {
                m.record(&instr);
            }
            if let Flow::Quit = self.step(instr)? {
                return Ok(Outcome::Normal);
            }
        }
    }

    fn step(&mut self, instr: Instruction) -> Result<Flow, Fault> {
        match instr {
            Instruction::Int(i) => self.push(Desc::Int(i))?,
            Instruction::Real(r) => self.push(Desc::Real(r))?,
            Instruction::Str(s) => self.push(Desc::Str(Qual::Image(s)))?,
            Instruction::Cset(i) => match self.csets.get(i as usize) {
                Some(b) => self.push(Desc::Cset(*b))?,
                None => return syserr(format!("no cset literal {i}")),
            },
            Instruction::Pnull => self.push(Desc::Null)?,
            Instruction::Push1 => self.push(Desc::Int(1))?,
            Instruction::Pushn1 => self.push(Desc::Int(-1))?,

            Instruction::Global(i) => self.push(Desc::Var(Loc::Global(i)))?,
            Instruction::Static(i) => {
                let base = match self.current_proc().and_then(|id| self.image.proc(id)) {
                    Some(p) => p.static_base,
                    None => return syserr("static variable outside a procedure"),
                };
                self.push(Desc::Var(Loc::Static(base + i)))?;
            }
            Instruction::Local(i) => {
                let pfp = self.current_pfp()?;
                self.push(Desc::Var(Loc::Slot(pfp + 1 + i)))?;
            }
            Instruction::Arg(i) => self.push(Desc::Var(Loc::Slot(self.regs.argp + 1 + i)))?,
            Instruction::Keywd(k) => match self.keyword(k)? {
                Some(d) => self.push(d)?,
                None => self.efail()?,
            },

            Instruction::Mark(target) => {
                let failure = Ipc {
                    code: self.regs.ipc.code,
                    pc: target,
                };
                self.mark(Some(failure))?;
            }
            Instruction::Mark0 => self.mark(None)?,
            Instruction::Unmark => {
                self.unmark()?;
            }
            Instruction::Eret => {
                let v = self.pop()?;
                self.unmark()?;
                self.push(v)?;
            }
            Instruction::Efail => self.efail()?,
            Instruction::Esusp => self.esusp()?,
            Instruction::Lsusp => self.lsusp()?,
            Instruction::Limit => {
                let v = self.deref(self.top()?)?;
                let Some(limit) = self.cvint(v) else {
                    return runerr(101, v);
                };
                if limit < 0 {
                    return runerr(205, v);
                }
                if limit == 0 {
                    self.efail()?;
                } else {
                    let top = self.top_index()?;
                    self.set(top, Desc::Int(limit))?;
                    self.mark(None)?;
                }
            }
            Instruction::Pret => self.pret()?,
            Instruction::Pfail => self.pfail()?,
            Instruction::Psusp => self.psusp()?,
            Instruction::Chfail(target) => {
                let efp = self.current_efp()?;
                let code = self.regs.ipc.code;
                match self.stack.get_mut(efp as usize) {
                    Some(Slot::Expr(f)) => f.failure = Some(Ipc { code, pc: target }),
                    _ => return syserr("chfail without an expression frame"),
                }
            }

            Instruction::Goto(target) => self.regs.ipc.pc = target,
            Instruction::Init(target) => {
                let here = (self.regs.ipc.code, self.regs.ipc.pc - 1);
                if !self.inited.insert(here) {
                    self.regs.ipc.pc = target;
                }
            }
            Instruction::Line(n) => self.regs.line = n,
            Instruction::Dup => {
                let v = self.top()?;
                self.push(Desc::Null)?;
                self.push(v)?;
            }
            Instruction::Sdup => {
                let v = self.top()?;
                self.push(v)?;
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Ccase => {
                let efp = self.current_efp()?;
                let Some(below) = efp.checked_sub(1) else {
                    return syserr("case value below the stack bottom");
                };
                let v = self.desc(below)?;
                self.push(v)?;
            }
            Instruction::Quit => return Ok(Flow::Quit),

            Instruction::Invoke(n) => self.invoke(n)?,
            Instruction::Llist(n) => self.llist(n)?,
            Instruction::Field(i) => self.field(i)?,

            Instruction::Create(target) => self.create(target)?,
            Instruction::Coact => self.coact()?,
            Instruction::Coret => self.coret()?,
            Instruction::Cofail => self.cofail()?,

            Instruction::Op(op) => self.operate(op)?,
        }
        Ok(Flow::Continue)
    }

    fn mark(&mut self, failure: Option<Ipc>) -> Result<(), Fault> {
        self.push_slot(Slot::Expr(ExprFrame {
            failure,
            efp: self.regs.efp,
            gfp: self.regs.gfp,
        }))?;
        self.regs.efp = Some(self.top_index()?);
        self.regs.gfp = None;
        Ok(())
    }

    fn unmark(&mut self) -> Result<(), Fault> {
        let efp = self.current_efp()?;
        let ef = self.expr_frame(efp)?;
        self.regs.gfp = ef.gfp;
        self.truncate(efp);
        self.regs.efp = ef.efp;
        Ok(())
    }

    fn suspended(&mut self) {
        if let Some(m) = self.metrics.as_mut() {
            m.suspensions += 1;
        }
        self.note_stack_depth();
    }

    /// Suspends the value on top of the stack out of the current expression frame.
    fn esusp(&mut self) -> Result<(), Fault> {
        let efp = self.current_efp()?;
        let ef = self.expr_frame(efp)?;
        let v = self.top()?;
        let start = self.region_start(ef.gfp, ef.efp, self.regs.pfp)?;
        self.push_slot(Slot::Gen(Box::new(GenFrame {
            kind: GenKind::Esusp,
            efp: self.regs.efp,
            gfp: self.regs.gfp,
            ipc: self.regs.ipc,
            line: self.regs.line,
        })))?;
        let marker = self.top_index()?;
        self.copy_region(start, efp)?;
        self.push(v)?;
        self.regs.efp = ef.efp;
        self.regs.gfp = Some(marker);
        self.suspended();
        Ok(())
    }

    /// Produces a value out of a limited expression, counting down the limit stored just below
    /// its expression frame.
    fn lsusp(&mut self) -> Result<(), Fault> {
        let efp = self.current_efp()?;
        let ef = self.expr_frame(efp)?;
        let Some(counter_at) = efp.checked_sub(1) else {
            return syserr("limit counter below the stack bottom");
        };
        let Desc::Int(count) = self.desc(counter_at)? else {
            return syserr("limit counter is not an integer");
        };
        let remaining = count - 1;
        if remaining != 0 {
            self.set(counter_at, Desc::Int(remaining))?;
            let v = self.pop()?;
            let start = self.region_start(ef.gfp, ef.efp, self.regs.pfp)?;
            self.copy_region(start, counter_at)?;
            self.push(v)?;
            self.regs.efp = ef.efp;
            if self.regs.gfp.is_none() {
                self.regs.gfp = ef.gfp;
            }
            self.suspended();
        } else {
            let v = self.top()?;
            self.set(counter_at, v)?;
            self.regs.gfp = ef.gfp;
            self.truncate(efp);
            self.regs.efp = ef.efp;
        }
        Ok(())
    }

    fn current_icon_proc(&self) -> Result<ProcId, Fault> {
        match self.current_proc() {
            Some(id) => Ok(id),
            None => syserr("procedure instruction outside a procedure"),
        }
    }

    fn pret(&mut self) -> Result<(), Fault> {
        let id = self.current_icon_proc()?;
        let v = self.deref_if_local(self.top()?)?;
        let pfp = self.current_pfp()?;
        let pf = self.proc_frame(pfp)?;
        let argp = self.regs.argp;
        self.set(argp, v)?;
        self.k_level -= 1;
        if self.k_trace != 0 {
            self.rtrace(id, v)?;
        }
        self.truncate(argp + 1);
        self.regs = pf.caller;
        Ok(())
    }

    fn pfail(&mut self) -> Result<(), Fault> {
        let id = self.current_icon_proc()?;
        let pfp = self.current_pfp()?;
        let pf = self.proc_frame(pfp)?;
        self.k_level -= 1;
        if self.k_trace != 0 {
            self.ftrace(id)?;
        }
        self.regs = pf.caller;
        self.efail()
    }

    /// Suspends the value on top of the stack out of the current procedure, leaving the
    /// procedure's frame in place under a generator frame.
    fn psusp(&mut self) -> Result<(), Fault> {
        let id = self.current_icon_proc()?;
        let v = self.deref_if_local(self.top()?)?;
        let pfp = self.current_pfp()?;
        let pf = self.proc_frame(pfp)?;
        let argp = self.regs.argp;
        let start = self.region_start(pf.caller.gfp, pf.caller.efp, pf.caller.pfp)?;
        self.push_slot(Slot::Gen(Box::new(GenFrame {
            kind: GenKind::Psusp {
                argp,
                pfp: Some(pfp),
            },
            efp: self.regs.efp,
            gfp: self.regs.gfp,
            ipc: self.regs.ipc,
            line: self.regs.line,
        })))?;
        let marker = self.top_index()?;
        self.copy_region(start, argp)?;
        self.push(v)?;
        self.k_level -= 1;
        if self.k_trace != 0 {
            self.strace(id, v)?;
        }
        self.regs = Regs {
            gfp: Some(marker),
            ..pf.caller
        };
        self.suspended();
        Ok(())
    }

    /// Fails the current expression: resumes the most recent suspended generator in it, or
    /// removes it and branches to its failure target, repeating outward as needed.
    pub(crate) fn efail(&mut self) -> Result<(), Fault> {
        loop {
            let Some(g) = self.regs.gfp else {
                let efp = self.current_efp()?;
                let ef = self.expr_frame(efp)?;
                self.regs.gfp = ef.gfp;
                self.truncate(efp);
                self.regs.efp = ef.efp;
                if let Some(failure) = ef.failure {
                    self.regs.ipc = failure;
                    return Ok(());
                }
                continue;
            };

            self.truncate(g + 1);
            let Some(Slot::Gen(frame)) = self.stack.pop() else {
                return syserr(format!("slot {g} is not a generator frame"));
            };
            let GenFrame {
                kind,
                efp,
                gfp,
                ipc,
                line,
            } = *frame;
            if let Some(m) = self.metrics.as_mut() {
                m.resumptions += 1;
            }
            if let GenKind::Psusp { argp, .. } = kind {
                if self.k_trace != 0 {
                    if let Desc::Proc(ProcRef::Icon(id)) = self.desc(argp)? {
                        self.atrace(id)?;
                    }
                }
            }
            self.regs.ipc = ipc;
            self.regs.efp = efp;
            self.regs.line = line;
            self.regs.gfp = gfp;

            match kind {
                GenKind::Esusp => continue,
                GenKind::Psusp { argp, pfp } => {
                    self.regs.argp = argp;
                    self.regs.pfp = pfp;
                    self.k_level += 1;
                    return Ok(());
                }
                GenKind::Csusp { state, cargp } => {
                    let signal = state.resume(self, cargp)?;
                    if self.finish_call(signal, cargp)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// `[e1, ..., en]`: builds a list in the result slot below the top `n` values.
    fn llist(&mut self, n: u32) -> Result<(), Fault> {
        let Some(cargp) = (self.stack.len() as u32).checked_sub(n + 1) else {
            return syserr("list construction below the stack bottom");
        };
        self.reserve(crate::structs::list_need(n as usize))?;
        let mut values = Vec::with_capacity(n as usize);
        for i in 1..=n {
            values.push(self.deref(self.desc(cargp + i)?)?);
        }
        let list = self.alc_list(&values)?;
        self.set(cargp, Desc::List(list))?;
        self.truncate(cargp + 1);
        Ok(())
    }

    /// `e.f`: a variable for field `field` of the record on top of the stack.
    fn field(&mut self, field: u32) -> Result<(), Fault> {
        let top = self.top_index()?;
        let Some(cargp) = top.checked_sub(1) else {
            return syserr("field reference without a result slot");
        };
        let r = self.deref(self.desc(top)?)?;
        let Desc::Record(b) = r else {
            return runerr(107, r);
        };
        let Block::Record(rec) = self.block(b)? else {
            return syserr("record descriptor without a record block");
        };
        let index = self
            .image
            .record(rec.decl)
            .and_then(|decl| decl.fields.iter().position(|f| *f == field));
        let Some(index) = index else {
            return runerr(207, r);
        };
        self.set(
            cargp,
            Desc::Var(Loc::Block {
                block: b,
                index: index as u32,
            }),
        )?;
        self.truncate(cargp + 1);
        Ok(())
    }
}
