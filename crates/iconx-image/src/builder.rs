//! Label-based construction of procedure bodies.
//!
//! The translator that produces images sits outside this workspace; `ProcBuilder` is the seam
//! it (and the test suite) uses to emit code without hand-computing branch targets.

use crate::{Instruction, ProcDecl};

/// A forward-referencable branch target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("label {label} in `{proc_name}` was never bound")]
    UnboundLabel { proc_name: String, label: u32 },
    #[error("label {label} in `{proc_name}` bound twice")]
    Rebound { proc_name: String, label: u32 },
}

#[derive(Debug, Clone, Copy)]
enum Fixup {
    Mark,
    Chfail,
    Goto,
    Init,
    Create,
}

#[derive(Debug)]
pub struct ProcBuilder {
    decl: ProcDecl,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Fixup, Label)>,
    rebound: Option<u32>,
}

impl ProcBuilder {
    pub fn new(name: &str, nparams: u32, nlocals: u32) -> Self {
        Self {
            decl: ProcDecl {
                name: name.to_string(),
                file: "main.icn".to_string(),
                nparams,
                nlocals,
                static_base: 0,
                nstatics: 0,
                local_names: Vec::new(),
                code: Vec::new(),
            },
            labels: Vec::new(),
            fixups: Vec::new(),
            rebound: None,
        }
    }

    pub fn file(mut self, file: &str) -> Self {
        self.decl.file = file.to_string();
        self
    }

    pub fn statics(mut self, n: u32) -> Self {
        self.decl.nstatics = n;
        self
    }

    pub fn local_names(mut self, names: &[&str]) -> Self {
        self.decl.local_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        let here = self.decl.code.len() as u32;
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => *slot = Some(here),
            Some(Some(_)) => self.rebound = Some(label.0),
            None => self.rebound = Some(label.0),
        }
    }

    pub fn here(&self) -> u32 {
        self.decl.code.len() as u32
    }

    pub fn emit(&mut self, inst: Instruction) -> &mut Self {
        self.decl.code.push(inst);
        self
    }

    pub fn emit_all(&mut self, insts: impl IntoIterator<Item = Instruction>) -> &mut Self {
        self.decl.code.extend(insts);
        self
    }

    fn emit_fixup(&mut self, kind: Fixup, label: Label) -> &mut Self {
        self.fixups.push((self.decl.code.len(), kind, label));
        self.decl.code.push(Instruction::Goto(u32::MAX));
        self
    }

    pub fn mark(&mut self, label: Label) -> &mut Self {
        self.emit_fixup(Fixup::Mark, label)
    }

    pub fn chfail(&mut self, label: Label) -> &mut Self {
        self.emit_fixup(Fixup::Chfail, label)
    }

    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.emit_fixup(Fixup::Goto, label)
    }

    pub fn init(&mut self, label: Label) -> &mut Self {
        self.emit_fixup(Fixup::Init, label)
    }

    pub fn create(&mut self, label: Label) -> &mut Self {
        self.emit_fixup(Fixup::Create, label)
    }

    pub fn finish(mut self) -> Result<ProcDecl, BuildError> {
        if let Some(label) = self.rebound {
            return Err(BuildError::Rebound {
                proc_name: self.decl.name,
                label,
            });
        }
        for (at, kind, label) in std::mem::take(&mut self.fixups) {
            let Some(Some(target)) = self.labels.get(label.0 as usize).copied() else {
                return Err(BuildError::UnboundLabel {
                    proc_name: self.decl.name,
                    label: label.0,
                });
            };
            self.decl.code[at] = match kind {
                Fixup::Mark => Instruction::Mark(target),
                Fixup::Chfail => Instruction::Chfail(target),
                Fixup::Goto => Instruction::Goto(target),
                Fixup::Init => Instruction::Init(target),
                Fixup::Create => Instruction::Create(target),
            };
        }
        Ok(self.decl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_labels_are_patched() {
        let mut b = ProcBuilder::new("main", 0, 0);
        let fail = b.label();
        b.mark(fail);
        b.emit(Instruction::Int(1));
        b.emit(Instruction::Unmark);
        b.bind(fail);
        b.emit(Instruction::Pfail);
        let decl = b.finish().unwrap();
        assert_eq!(decl.code[0], Instruction::Mark(3));
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = ProcBuilder::new("main", 0, 0);
        let l = b.label();
        b.goto(l);
        let err = b.finish().unwrap_err();
        assert!(matches!(err, BuildError::UnboundLabel { label: 0, .. }));
    }
}
