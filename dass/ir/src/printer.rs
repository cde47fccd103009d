//! Implements a formatter for the in-memory representation of functions.
//! The output follows LLVM's textual syntax closely enough to be read by a
//! person familiar with it; it is not meant to be parsed back.
use crate::{self as ir, InstIdx, Opcode, Value};
use itertools::Itertools;
use std::io;

/// Printer for the IR.
pub struct Printer;

impl Printer {
    /// Format attributes of the form `#{"dass_ss"="1"}`.
    /// Returns the empty string if the `attrs` is empty.
    fn format_attributes(attrs: &ir::Attributes) -> String {
        if attrs.is_empty() {
            "".to_string()
        } else {
            format!(
                " #{{{}}}",
                attrs
                    .iter()
                    .map(|(k, v)| format!("\"{k}\"=\"{v}\""))
                    .join(", ")
            )
        }
    }

    fn typed(func: &ir::Function, v: &Value) -> String {
        format!("{} {}", func.value_type(v), func.value_name(v))
    }

    fn label(func: &ir::Function, bb: ir::BlockIdx) -> String {
        format!("label %{}", func.blocks[bb].name)
    }

    /// Prints out the whole program.
    pub fn write_context<F: io::Write>(
        ctx: &ir::Context,
        f: &mut F,
    ) -> io::Result<()> {
        for func in &ctx.functions {
            Self::write_function(func, f)?;
            writeln!(f)?;
        }
        Ok(())
    }

    pub fn write_function<F: io::Write>(
        func: &ir::Function,
        f: &mut F,
    ) -> io::Result<()> {
        let args = func
            .args
            .iter()
            .map(|a| format!("{} %{}", a.ty, a.name))
            .join(", ");
        writeln!(
            f,
            "define {} @{}({}){} {{",
            func.ret_ty,
            func.name,
            args,
            Self::format_attributes(&func.attributes)
        )?;
        for bb in &func.layout {
            let block = &func.blocks[*bb];
            match &block.loop_md {
                Some(md) => writeln!(f, "{}:  ; {md}", block.name)?,
                None => writeln!(f, "{}:", block.name)?,
            }
            for i in &block.insts {
                writeln!(f, "  {}", Self::format_instruction(func, *i))?;
            }
        }
        writeln!(f, "}}")
    }

    pub fn format_instruction(func: &ir::Function, idx: InstIdx) -> String {
        let inst = &func.insts[idx];
        let ops = &inst.operands;
        let body = match &inst.op {
            Opcode::Binary { op, flags } => {
                let mut kw = op.mnemonic().to_string();
                if flags.nuw {
                    kw.push_str(" nuw");
                }
                if flags.nsw {
                    kw.push_str(" nsw");
                }
                if flags.exact {
                    kw.push_str(" exact");
                }
                format!(
                    "{kw} {}, {}",
                    Self::typed(func, &ops[0]),
                    func.value_name(&ops[1])
                )
            }
            Opcode::ICmp(_) | Opcode::FCmp(_) => format!(
                "{} {}, {}",
                inst.op.mnemonic(),
                Self::typed(func, &ops[0]),
                func.value_name(&ops[1])
            ),
            Opcode::Cast(c) => format!(
                "{} {} to {}",
                c.mnemonic(),
                Self::typed(func, &ops[0]),
                inst.ty
            ),
            Opcode::Phi { .. } => format!(
                "phi {} {}",
                inst.ty,
                inst.incoming()
                    .map(|(bb, v)| format!(
                        "[ {}, %{} ]",
                        func.value_name(&v),
                        func.blocks[bb].name
                    ))
                    .join(", ")
            ),
            Opcode::Gep => format!(
                "getelementptr {}, {}, {}",
                func.value_type(&ops[0])
                    .pointee()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "i8".to_string()),
                Self::typed(func, &ops[0]),
                Self::typed(func, &ops[1])
            ),
            Opcode::Load => {
                format!("load {}, {}", inst.ty, Self::typed(func, &ops[0]))
            }
            Opcode::Call { callee } => format!(
                "call {} @{callee}({})",
                inst.ty,
                ops.iter().map(|v| Self::typed(func, v)).join(", ")
            ),
            Opcode::Alloca => format!(
                "alloca {}",
                inst.ty
                    .pointee()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "i8".to_string())
            ),
            Opcode::Br { target } => format!("br {}", Self::label(func, *target)),
            Opcode::CondBr { then_bb, else_bb } => format!(
                "br {}, {}, {}",
                Self::typed(func, &ops[0]),
                Self::label(func, *then_bb),
                Self::label(func, *else_bb)
            ),
            Opcode::Switch { default, cases } => {
                let ty = func.value_type(&ops[0]);
                format!(
                    "switch {}, {} [ {} ]",
                    Self::typed(func, &ops[0]),
                    Self::label(func, *default),
                    cases
                        .iter()
                        .map(|(c, bb)| format!(
                            "{ty} {c}, {}",
                            Self::label(func, *bb)
                        ))
                        .join(" ")
                )
            }
            Opcode::Ret => match ops.first() {
                Some(v) => format!("ret {}", Self::typed(func, v)),
                None => "ret void".to_string(),
            },
            Opcode::Select | Opcode::Store => format!(
                "{} {}",
                inst.op.mnemonic(),
                ops.iter().map(|v| Self::typed(func, v)).join(", ")
            ),
        };
        if inst.has_result() {
            format!("%{} = {body}", inst.name)
        } else {
            body
        }
    }

    /// Render a function into a string.
    pub fn function_to_string(func: &ir::Function) -> String {
        let mut buf = Vec::new();
        Self::write_function(func, &mut buf)
            .unwrap_or_else(|_| unreachable!("writing to a vector cannot fail"));
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Argument, Builder, Function, Type};

    #[test]
    fn prints_llvm_like_text() {
        let mut f = Function::new(
            "f",
            vec![Argument {
                name: "a".into(),
                ty: Type::Int(32),
            }],
        );
        f.mark_static("1");
        let mut b = Builder::new(&mut f);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let x = b.add(Value::Arg(0), Value::int(32, 1));
        b.ret(Some(x.into()));
        let text = Printer::function_to_string(&f);
        assert_eq!(
            text,
            "define void @f(i32 %a) #{\"dass_ss\"=\"1\"} {\n\
             entry:\n  %add = add i32 %a, 1\n  ret i32 %add\n}\n"
        );
    }
}
