use iconx::image::{GlobalInit, Image, Instruction};
use iconx::load_image;
use std::env;
use std::fmt::Write as _;
use std::path::Path;
use std::process;

fn usage() -> ! {
    eprintln!("usage: iconx-dump [--no-code] <image.icx>");
    process::exit(2);
}

fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out
}

fn render(image: &Image, with_code: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "image: {} procedures, {} records, {} globals, {} statics, {} string bytes, {} csets",
        image.procs.len(),
        image.records.len(),
        image.globals.len(),
        image.nstatics,
        image.strings.len(),
        image.csets.len()
    );
    if image.trace != 0 {
        let _ = writeln!(out, "trace: {}", image.trace);
    }

    out.push_str("\nglobals:\n");
    for (i, (name, init)) in image.global_names.iter().zip(&image.globals).enumerate() {
        let init = match init {
            GlobalInit::Null => "&null".to_string(),
            GlobalInit::Proc(id) => match image.proc(*id) {
                Some(p) => format!("procedure {}", p.name),
                None => format!("procedure #{}", id.0),
            },
            GlobalInit::Record(id) => match image.record(*id) {
                Some(r) => format!("record constructor {}", r.name),
                None => format!("record constructor #{}", id.0),
            },
            GlobalInit::Function(name) => format!("function {name}"),
        };
        let _ = writeln!(out, "  {i:4} {name} = {init}");
    }

    if !image.records.is_empty() {
        out.push_str("\nrecords:\n");
        for r in &image.records {
            let fields: Vec<&str> = r
                .fields
                .iter()
                .map(|f| image.fields.get(*f as usize).map_or("?", String::as_str))
                .collect();
            let _ = writeln!(out, "  {}({})", r.name, fields.join(","));
        }
    }

    for (i, p) in image.procs.iter().enumerate() {
        let _ = writeln!(
            out,
            "\nprocedure {} #{i} ({}): {} params, {} locals, statics {}+{}",
            p.name, p.file, p.nparams, p.nlocals, p.static_base, p.nstatics
        );
        if !with_code {
            continue;
        }
        for (pc, instr) in p.code.iter().enumerate() {
            let _ = write!(out, "  {pc:5}  {instr}");
            if let Instruction::Str(s) = instr {
                let _ = write!(out, "  \"{}\"", escape(image.str_bytes(*s)));
            }
            out.push('\n');
        }
    }
    out
}

fn main() {
    env_logger::init();

    let mut with_code = true;
    let mut path: Option<String> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--no-code" => with_code = false,
            "-h" | "--help" => usage(),
            _ if path.is_none() => path = Some(arg),
            _ => usage(),
        }
    }
    let Some(path) = path else { usage() };

    match load_image(Path::new(&path)) {
        Ok(image) => print!("{}", render(&image, with_code)),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
