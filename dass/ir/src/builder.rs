//! IR construction helpers. The builder names every new value uniquely within
//! the function and infers result types from operands.
use crate::{
    BinOp, BlockIdx, CastOp, FCmpPred, Function, ICmpPred, InstIdx,
    Instruction, LoopMetadata, Opcode, Type, Value, WrapFlags,
};
use dass_utils::{Id, NameGenerator};
use smallvec::SmallVec;

/// IR builder.
/// Uses internal references to the function to construct and validate
/// constructs when needed.
pub struct Builder<'a> {
    /// Function being modified.
    pub func: &'a mut Function,
    namegen: NameGenerator,
    block: Option<BlockIdx>,
    /// Insertion position inside `block`; `None` appends.
    pos: Option<usize>,
}

impl<'a> Builder<'a> {
    pub fn new(func: &'a mut Function) -> Self {
        let namegen = func.namegen();
        Builder {
            func,
            namegen,
            block: None,
            pos: None,
        }
    }

    /// Append a new block with a fresh name derived from `prefix`.
    pub fn add_block<S: Into<Id>>(&mut self, prefix: S) -> BlockIdx {
        let name = self.namegen.gen_name(prefix);
        self.func.add_block(name)
    }

    /// Append subsequent instructions to the end of `bb`.
    pub fn set_insert_point(&mut self, bb: BlockIdx) {
        self.block = Some(bb);
        self.pos = None;
    }

    /// Insert subsequent instructions before position `pos` of `bb`.
    pub fn set_insert_before(&mut self, bb: BlockIdx, pos: usize) {
        self.block = Some(bb);
        self.pos = Some(pos);
    }

    pub fn current_block(&self) -> Option<BlockIdx> {
        self.block
    }

    pub fn set_loop_md(&mut self, bb: BlockIdx, md: LoopMetadata) {
        self.func.blocks[bb].loop_md = Some(md);
    }

    /// Generic instruction constructor.
    ///
    /// # Panics
    /// Panics if no insertion block was set.
    pub fn build(
        &mut self,
        op: Opcode,
        operands: SmallVec<[Value; 3]>,
        ty: Type,
        prefix: &str,
    ) -> InstIdx {
        let bb = self
            .block
            .unwrap_or_else(|| panic!("Builder has no insertion block"));
        let name = if ty == Type::Void {
            Id::default()
        } else {
            self.namegen.gen_name(prefix)
        };
        let inst = Instruction {
            name,
            op,
            operands,
            ty,
            block: bb,
        };
        match self.pos.as_mut() {
            Some(pos) => {
                let idx = self.func.insert_inst(bb, *pos, inst);
                *pos += 1;
                idx
            }
            None => self.func.push_inst(bb, inst),
        }
    }

    pub fn binary_flags(
        &mut self,
        op: BinOp,
        flags: WrapFlags,
        lhs: Value,
        rhs: Value,
    ) -> InstIdx {
        let ty = self.func.value_type(&lhs);
        self.build(
            Opcode::Binary { op, flags },
            smallvec::smallvec![lhs, rhs],
            ty,
            op.mnemonic(),
        )
    }

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> InstIdx {
        self.binary_flags(op, WrapFlags::default(), lhs, rhs)
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> InstIdx {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: Value, rhs: Value) -> InstIdx {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> InstIdx {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: ICmpPred, lhs: Value, rhs: Value) -> InstIdx {
        self.build(
            Opcode::ICmp(pred),
            smallvec::smallvec![lhs, rhs],
            Type::Int(1),
            "cmp",
        )
    }

    pub fn fcmp(&mut self, pred: FCmpPred, lhs: Value, rhs: Value) -> InstIdx {
        self.build(
            Opcode::FCmp(pred),
            smallvec::smallvec![lhs, rhs],
            Type::Int(1),
            "cmp",
        )
    }

    pub fn cast(&mut self, op: CastOp, v: Value, ty: Type) -> InstIdx {
        self.build(Opcode::Cast(op), smallvec::smallvec![v], ty, "conv")
    }

    pub fn zext(&mut self, v: Value, width: u32) -> InstIdx {
        self.cast(CastOp::ZExt, v, Type::Int(width))
    }

    pub fn sext(&mut self, v: Value, width: u32) -> InstIdx {
        self.cast(CastOp::SExt, v, Type::Int(width))
    }

    pub fn trunc(&mut self, v: Value, width: u32) -> InstIdx {
        self.cast(CastOp::Trunc, v, Type::Int(width))
    }

    pub fn select(&mut self, cond: Value, t: Value, f: Value) -> InstIdx {
        let ty = self.func.value_type(&t);
        self.build(Opcode::Select, smallvec::smallvec![cond, t, f], ty, "sel")
    }

    /// A phi with the given incoming pairs. More can be added later with
    /// [Builder::add_incoming].
    pub fn phi(&mut self, ty: Type, incoming: &[(BlockIdx, Value)]) -> InstIdx {
        self.build(
            Opcode::Phi {
                blocks: incoming.iter().map(|(b, _)| *b).collect(),
            },
            incoming.iter().map(|(_, v)| *v).collect(),
            ty,
            "phi",
        )
    }

    pub fn add_incoming(&mut self, phi: InstIdx, bb: BlockIdx, v: Value) {
        let inst = self.func.inst_mut(phi);
        if let Opcode::Phi { blocks } = &mut inst.op {
            blocks.push(bb);
            inst.operands.push(v);
        }
    }

    pub fn gep(&mut self, base: Value, index: Value) -> InstIdx {
        let ty = self.func.value_type(&base);
        self.build(Opcode::Gep, smallvec::smallvec![base, index], ty, "arrayidx")
    }

    /// Load through `ptr`. Pointers with an opaque element type load bytes.
    pub fn load(&mut self, ptr: Value) -> InstIdx {
        let ty = self.func.value_type(&ptr).pointee().unwrap_or(Type::Int(8));
        self.build(Opcode::Load, smallvec::smallvec![ptr], ty, "ld")
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> InstIdx {
        self.build(
            Opcode::Store,
            smallvec::smallvec![value, ptr],
            Type::Void,
            "",
        )
    }

    /// Stack slot holding one value of type `ty`.
    pub fn alloca(&mut self, ty: Type) -> InstIdx {
        self.build(Opcode::Alloca, SmallVec::new(), ty.ptr_to(), "alloca")
    }

    pub fn call<S: Into<Id>>(
        &mut self,
        callee: S,
        args: &[Value],
        ret_ty: Type,
    ) -> InstIdx {
        self.build(
            Opcode::Call {
                callee: callee.into(),
            },
            args.iter().copied().collect(),
            ret_ty,
            "call",
        )
    }

    pub fn br(&mut self, target: BlockIdx) -> InstIdx {
        self.build(Opcode::Br { target }, SmallVec::new(), Type::Void, "")
    }

    pub fn cond_br(
        &mut self,
        cond: Value,
        then_bb: BlockIdx,
        else_bb: BlockIdx,
    ) -> InstIdx {
        self.build(
            Opcode::CondBr { then_bb, else_bb },
            smallvec::smallvec![cond],
            Type::Void,
            "",
        )
    }

    pub fn switch(
        &mut self,
        cond: Value,
        default: BlockIdx,
        cases: Vec<(i64, BlockIdx)>,
    ) -> InstIdx {
        self.build(
            Opcode::Switch { default, cases },
            smallvec::smallvec![cond],
            Type::Void,
            "",
        )
    }

    pub fn ret(&mut self, value: Option<Value>) -> InstIdx {
        self.build(Opcode::Ret, value.into_iter().collect(), Type::Void, "")
    }
}
