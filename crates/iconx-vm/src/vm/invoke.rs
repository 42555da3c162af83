//! Invocation: Icon procedures, builtin functions, record constructors, argument selection and
//! string invocation, plus the completion protocol shared by builtins and operators.

use super::*;
use crate::builtins::FUNCTIONS;
use crate::structs::record_need;

/// Slots an Icon procedure frame must leave free above its locals.
const FRAME_HEADROOM: u32 = 20;

/// How a builtin function or operator finished.
#[derive(Debug)]
pub(crate) enum Signal {
    Return(Desc),
    Fail,
    /// Produced a value and can be resumed for more.
    Suspend(Desc, GenState),
}

impl Vm {
    /// Invokes the value at the slot below the top `nargs` arguments.
    pub(crate) fn invoke(&mut self, nargs: u32) -> Result<(), Fault> {
        let Some(cargp) = (self.stack.len() as u32).checked_sub(nargs + 1) else {
            return syserr("invoke below the stack bottom");
        };
        let callee = self.deref(self.desc(cargp)?)?;
        self.set(cargp, callee)?;
        for i in 1..=nargs {
            let arg = self.deref(self.desc(cargp + i)?)?;
            self.set(cargp + i, arg)?;
        }
        if let Some(m) = self.metrics.as_mut() {
            m.invocations += 1;
        }

        let proc = match callee {
            Desc::Proc(p) => p,
            Desc::Int(_) | Desc::Real(_) => return self.select_arg(callee, cargp, nargs),
            Desc::Str(q) => {
                if let Some(i) = self.cvint(callee) {
                    return self.select_arg(Desc::Int(i), cargp, nargs);
                }
                let name = self.qual_bytes(q).to_vec();
                match self.proc_named(&name) {
                    Some(p) => {
                        self.set(cargp, Desc::Proc(p))?;
                        p
                    }
                    None => return runerr(106, callee),
                }
            }
            other => match self.cvint(other) {
                Some(i) => return self.select_arg(Desc::Int(i), cargp, nargs),
                None => return runerr(106, other),
            },
        };

        match proc {
            ProcRef::Icon(id) => self.invoke_icon(id, cargp, nargs),
            ProcRef::Builtin(i) => {
                let Some(f) = FUNCTIONS.get(i as usize) else {
                    return syserr(format!("no builtin function {i}"));
                };
                let nargs = match u32::try_from(f.arity) {
                    Ok(arity) => {
                        self.adjust_args(cargp, nargs, arity)?;
                        arity
                    }
                    Err(_) => nargs,
                };
                let signal = (f.func)(self, cargp, nargs)?;
                if !self.finish_call(signal, cargp)? {
                    self.efail()?;
                }
                Ok(())
            }
            ProcRef::Record(id) => {
                let nfields = match self.image.record(id) {
                    Some(r) => r.fields.len() as u32,
                    None => return syserr(format!("no record constructor {}", id.0)),
                };
                self.adjust_args(cargp, nargs, nfields)?;
                self.reserve(record_need(nfields as usize))?;
                let fields = (1..=nfields)
                    .map(|i| self.desc(cargp + i))
                    .collect::<Result<Vec<_>, _>>()?;
                let r = self.alc_record(id, fields)?;
                self.set(cargp, Desc::Record(r))?;
                self.truncate(cargp + 1);
                Ok(())
            }
        }
    }

    /// `i(e1, ..., en)`: produces the `i`th argument, failing when it is out of range.
    fn select_arg(&mut self, index: Desc, cargp: u32, nargs: u32) -> Result<(), Fault> {
        let Some(mut i) = self.cvint(index) else {
            return runerr(106, index);
        };
        if i < 0 {
            i += nargs as i64 + 1;
        }
        if i <= 0 || i > nargs as i64 {
            self.truncate(cargp);
            return self.efail();
        }
        let chosen = self.desc(cargp + i as u32)?;
        self.set(cargp, chosen)?;
        self.truncate(cargp + 1);
        Ok(())
    }

    /// Resolves a procedure name for string invocation: globals holding procedures first, then
    /// builtin functions.
    pub(crate) fn proc_named(&self, name: &[u8]) -> Option<ProcRef> {
        let name = std::str::from_utf8(name).ok()?;
        if let Some(Desc::Proc(p)) = self
            .image
            .global_id(name)
            .and_then(|i| self.globals.get(i as usize))
        {
            return Some(*p);
        }
        FUNCTIONS
            .iter()
            .position(|f| f.name == name)
            .map(|i| ProcRef::Builtin(i as u16))
    }

    /// Pads missing arguments with `&null` and drops extras.
    fn adjust_args(&mut self, cargp: u32, nargs: u32, want: u32) -> Result<(), Fault> {
        if nargs > want {
            self.truncate(cargp + 1 + want);
        }
        for _ in nargs..want {
            self.push(Desc::Null)?;
        }
        Ok(())
    }

    fn invoke_icon(&mut self, id: ProcId, cargp: u32, nargs: u32) -> Result<(), Fault> {
        let Some(decl) = self.image.proc(id) else {
            return syserr(format!("no procedure {}", id.0));
        };
        let (nparams, nlocals) = (decl.nparams, decl.nlocals);
        self.adjust_args(cargp, nargs, nparams)?;

        let projected = self.stack.len() as u32 + 1 + nlocals + FRAME_HEADROOM;
        if projected > self.slot_limit {
            return runerr_bare(301);
        }
        self.push_slot(Slot::Proc(ProcFrame {
            nargs: nparams,
            nlocals,
            caller: self.regs,
        }))?;
        let pfp = self.top_index()?;
        for _ in 0..nlocals {
            self.push(Desc::Null)?;
        }
        self.regs = Regs {
            efp: None,
            gfp: None,
            pfp: Some(pfp),
            argp: cargp,
            ipc: Ipc {
                code: Code::Proc(id),
                pc: 0,
            },
            line: self.regs.line,
        };
        self.k_level += 1;
        self.note_stack_depth();
        if self.k_trace != 0 {
            self.ctrace(id, cargp, nparams)?;
        }
        Ok(())
    }

    /// Completes a builtin or operator call whose result slot is `cargp`. Returns `false` when
    /// the call failed; the caller then fails the current expression.
    pub(crate) fn finish_call(&mut self, signal: Signal, cargp: u32) -> Result<bool, Fault> {
        match signal {
            Signal::Return(v) => {
                self.set(cargp, v)?;
                self.truncate(cargp + 1);
                Ok(true)
            }
            Signal::Fail => Ok(false),
            Signal::Suspend(v, state) => {
                self.csusp(v, state, cargp)?;
                Ok(true)
            }
        }
    }

    /// Suspends a builtin generator: leaves its arguments in place under a generator frame,
    /// duplicates the enclosing region above it and pushes the value.
    fn csusp(&mut self, v: Desc, state: GenState, cargp: u32) -> Result<(), Fault> {
        let start = self.region_start(self.regs.gfp, self.regs.efp, self.regs.pfp)?;
        self.push_slot(Slot::Gen(Box::new(GenFrame {
            kind: GenKind::Csusp { state, cargp },
            efp: self.regs.efp,
            gfp: self.regs.gfp,
            ipc: self.regs.ipc,
            line: self.regs.line,
        })))?;
        let marker = self.top_index()?;
        self.copy_region(start, cargp)?;
        self.push(v)?;
        self.regs.gfp = Some(marker);
        if let Some(m) = self.metrics.as_mut() {
            m.suspensions += 1;
        }
        self.note_stack_depth();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_invocation_finds_builtins() {
        let vm = Vm::new(Image::default(), VmConfig::default(), VmIo::null()).unwrap();
        assert!(matches!(vm.proc_named(b"write"), Some(ProcRef::Builtin(_))));
        assert_eq!(vm.proc_named(b"no_such_function"), None);
    }
}
