//! Structural checks run on an image before it is executed.

use std::collections::BTreeMap;

use crate::{GlobalInit, Image, Instruction, ProcDecl};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("verify error: {message}")]
pub struct VerifyError {
    pub message: String,
}

fn fail<T>(message: String) -> Result<T, VerifyError> {
    Err(VerifyError { message })
}

pub fn verify_image(image: &Image) -> Result<(), VerifyError> {
    // Table length consistency.
    if image.global_names.len() != image.globals.len() {
        return fail(format!(
            "global name table length {} does not match globals length {}",
            image.global_names.len(),
            image.globals.len()
        ));
    }

    let mut expected_ids = BTreeMap::new();
    for (idx, name) in image.global_names.iter().enumerate() {
        if expected_ids.insert(name.clone(), idx as u32).is_some() {
            return fail(format!("duplicate global `{name}`"));
        }
    }
    if expected_ids != image.global_ids {
        return fail("global_ids map does not match global name table".to_string());
    }

    for (idx, init) in image.globals.iter().enumerate() {
        match init {
            GlobalInit::Null => {}
            GlobalInit::Proc(id) => {
                if id.0 as usize >= image.procs.len() {
                    return fail(format!(
                        "global {idx} refers to procedure {} (procs={})",
                        id.0,
                        image.procs.len()
                    ));
                }
            }
            GlobalInit::Record(id) => {
                if id.0 as usize >= image.records.len() {
                    return fail(format!(
                        "global {idx} refers to record {} (records={})",
                        id.0,
                        image.records.len()
                    ));
                }
            }
            GlobalInit::Function(name) => {
                if name.is_empty() {
                    return fail(format!("global {idx} names an empty function"));
                }
            }
        }
    }

    for rec in &image.records {
        for field in &rec.fields {
            if *field as usize >= image.fields.len() {
                return fail(format!(
                    "record `{}` refers to field {field} (fields={})",
                    rec.name,
                    image.fields.len()
                ));
            }
        }
    }

    for proc in &image.procs {
        verify_proc(image, proc)?;
    }
    Ok(())
}

fn verify_proc(image: &Image, proc: &ProcDecl) -> Result<(), VerifyError> {
    let name = &proc.name;
    let Some(last) = proc.code.last() else {
        return fail(format!("procedure `{name}` has no code"));
    };
    if !last.is_terminal() {
        return fail(format!(
            "procedure `{name}` falls off its end (last instruction `{last}`)"
        ));
    }

    let static_end = proc.static_base as u64 + proc.nstatics as u64;
    if static_end > image.nstatics as u64 {
        return fail(format!(
            "procedure `{name}` statics {}..{static_end} exceed static table ({})",
            proc.static_base, image.nstatics
        ));
    }

    if !proc.local_names.is_empty()
        && proc.local_names.len() as u64 != proc.nparams as u64 + proc.nlocals as u64
    {
        return fail(format!(
            "procedure `{name}` names {} locals but declares {}",
            proc.local_names.len(),
            proc.nparams as u64 + proc.nlocals as u64
        ));
    }

    let code_len = proc.code.len();
    for (pc, inst) in proc.code.iter().enumerate() {
        if let Some(target) = inst.target() {
            if target as usize >= code_len {
                return fail(format!(
                    "`{name}`@{pc}: branch target {target} out of range (code={code_len})"
                ));
            }
        }
        let bad = match inst {
            Instruction::Str(s) => s.end() > image.strings.len(),
            Instruction::Cset(i) => *i as usize >= image.csets.len(),
            Instruction::Global(i) => *i as usize >= image.globals.len(),
            Instruction::Static(i) => *i >= proc.nstatics,
            Instruction::Local(i) => *i >= proc.nlocals,
            Instruction::Arg(i) => *i >= proc.nparams,
            Instruction::Field(i) => *i as usize >= image.fields.len(),
            Instruction::Real(v) => !v.is_finite(),
            _ => false,
        };
        if bad {
            return fail(format!("`{name}`@{pc}: operand out of range in `{inst}`"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProcBuilder, ProcId, StrConst};

    fn image_with(code: Vec<Instruction>) -> Image {
        let mut image = Image::default();
        let mut b = ProcBuilder::new("main", 0, 1);
        b.emit_all(code);
        let id = image.add_proc(b.finish().unwrap()).unwrap();
        image.add_global("main", GlobalInit::Proc(id)).unwrap();
        image
    }

    #[test]
    fn accepts_minimal_image() {
        let image = image_with(vec![Instruction::Pnull, Instruction::Pret]);
        verify_image(&image).unwrap();
    }

    #[test]
    fn rejects_fallthrough_at_end() {
        let image = image_with(vec![Instruction::Pnull]);
        let err = verify_image(&image).unwrap_err();
        assert!(err.message.contains("falls off"), "{err}");
    }

    #[test]
    fn rejects_out_of_range_operands() {
        let image = image_with(vec![Instruction::Local(1), Instruction::Pret]);
        assert!(verify_image(&image).is_err());

        let image = image_with(vec![
            Instruction::Str(StrConst { offset: 0, len: 4 }),
            Instruction::Pret,
        ]);
        assert!(verify_image(&image).is_err());

        let image = image_with(vec![Instruction::Goto(9)]);
        assert!(verify_image(&image).is_err());
    }

    #[test]
    fn rejects_dangling_global_procedure() {
        let mut image = image_with(vec![Instruction::Pfail]);
        image.globals[0] = GlobalInit::Proc(ProcId(7));
        let err = verify_image(&image).unwrap_err();
        assert!(err.message.contains("procedure 7"), "{err}");
    }
}
