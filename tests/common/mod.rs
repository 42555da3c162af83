#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use iconx::image::{GlobalInit, Image, Instruction, ProcBuilder, ProcId};
use iconx::vm::{RunError, RunReport, Vm, VmConfig, VmIo};

/// Assembles a whole program: globals for builtins and procedures plus the constant pool.
#[derive(Default)]
pub struct Program {
    pub image: Image,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn str(&mut self, s: &str) -> Instruction {
        Instruction::Str(self.image.intern(s))
    }

    /// A variable for the global `name`, creating it as a builtin function reference.
    pub fn function(&mut self, name: &str) -> Instruction {
        let id = match self.image.global_id(name) {
            Some(id) => id,
            None => self
                .image
                .add_global(name, GlobalInit::Function(name.to_string()))
                .expect("function global"),
        };
        Instruction::Global(id)
    }

    /// A variable for the global `name`, creating it with a null value.
    pub fn global(&mut self, name: &str) -> Instruction {
        let id = match self.image.global_id(name) {
            Some(id) => id,
            None => self
                .image
                .add_global(name, GlobalInit::Null)
                .expect("null global"),
        };
        Instruction::Global(id)
    }

    /// Adds a procedure and points the global of the same name at it.
    pub fn procedure(&mut self, b: ProcBuilder) -> ProcId {
        let decl = b.finish().expect("procedure labels");
        let name = decl.name.clone();
        let id = self.image.add_proc(decl).expect("add procedure");
        match self.image.global_id(&name) {
            Some(g) => self.image.globals[g as usize] = GlobalInit::Proc(id),
            None => {
                self.image
                    .add_global(&name, GlobalInit::Proc(id))
                    .expect("procedure global");
            }
        }
        id
    }

    pub fn record(&mut self, name: &str, fields: &[&str]) {
        let id = self.image.add_record(name, fields).expect("add record");
        self.image
            .add_global(name, GlobalInit::Record(id))
            .expect("record global");
    }

    pub fn finish(self) -> Image {
        self.image
    }
}

#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Captured {
    pub result: Result<RunReport, RunError>,
    pub output: String,
    pub errout: String,
}

impl Captured {
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(report) => report.outcome.exit_code(),
            Err(e) => e.exit_code(),
        }
    }
}

pub fn run_with(image: Image, args: &[&str], input: &str, config: VmConfig) -> Captured {
    let output = SharedBuf::default();
    let errout = SharedBuf::default();
    let io = VmIo {
        input: Box::new(io::Cursor::new(input.as_bytes().to_vec())),
        output: Box::new(output.clone()),
        errout: Box::new(errout.clone()),
    };
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let result = Vm::new(image, config, io).and_then(|mut vm| vm.run(&args));
    Captured {
        result,
        output: output.contents(),
        errout: errout.contents(),
    }
}

pub fn run(image: Image) -> Captured {
    run_with(image, &[], "", VmConfig::default())
}

/// A configuration with regions small enough that ordinary programs collect.
pub fn tight_config() -> VmConfig {
    VmConfig {
        block_region: 4096,
        string_region: 1024,
        static_region: 8192,
        metrics: true,
        ..VmConfig::default()
    }
}

/// Emits `write(<value instructions>)` as a bounded statement.
pub fn write_stmt(p: &mut Program, b: &mut ProcBuilder, value: &[Instruction]) {
    let done = b.label();
    b.mark(done);
    let write = p.function("write");
    b.emit(write);
    b.emit_all(value.iter().cloned());
    b.emit(Instruction::Invoke(1));
    b.emit(Instruction::Unmark);
    b.bind(done);
}
