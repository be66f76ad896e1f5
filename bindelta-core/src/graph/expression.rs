//! Operand expression trees.
//!
//! Expressions form a forest of typed nodes. Nodes are content-addressed:
//! creating the same node twice yields the same index. Both pools are owned
//! by the loaded binary, so their lifetime ends with the model and ids stay
//! valid for as long as anything references them.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::hash::sdbm_hash;

/// Expression node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ExpressionKind {
    Symbol = 0,
    #[default]
    ImmediateInt = 1,
    ImmediateFloat = 2,
    Operator = 3,
    Register = 4,
    SizePrefix = 5,
    Dereference = 6,
}

/// One node of an operand expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    /// Symbol text; empty for pure immediates.
    pub symbol: String,
    pub immediate: i64,
    /// Index of the parent node in the pool; `None` for roots.
    pub parent: Option<u32>,
    /// Position among the parent's children.
    pub position: u16,
    pub is_relocation: bool,
}

impl Expression {
    pub fn is_immediate(&self) -> bool {
        matches!(
            self.kind,
            ExpressionKind::ImmediateInt | ExpressionKind::ImmediateFloat
        )
    }

    /// Interning key: type, tree position, immediate, symbol hash and parent
    /// id fully determine a node.
    fn signature(&self) -> ExpressionSignature {
        ExpressionSignature {
            kind: self.kind as u8,
            position: self.position,
            immediate: self.immediate,
            symbol_hash: sdbm_hash(self.symbol.as_bytes()),
            parent: self.parent.map_or(0, |parent| parent + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ExpressionSignature {
    kind: u8,
    position: u16,
    immediate: i64,
    symbol_hash: u32,
    parent: u32,
}

/// Per-load arena of interned expressions.
#[derive(Debug, Default)]
pub struct ExpressionPool {
    expressions: Vec<Expression>,
    index: HashMap<ExpressionSignature, u32>,
}

impl ExpressionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an expression, returning the index of the existing node if an
    /// identical one was added before.
    pub fn intern(&mut self, expression: Expression) -> u32 {
        let signature = expression.signature();
        if let Some(&id) = self.index.get(&signature) {
            return id;
        }
        let id = self.expressions.len() as u32;
        self.index.insert(signature, id);
        self.expressions.push(expression);
        id
    }

    pub fn get(&self, id: u32) -> &Expression {
        &self.expressions[id as usize]
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expression> {
        self.expressions.iter()
    }
}

/// Per-load arena of interned operands. An operand is an ordered list of
/// expression indices (a pre-order walk of its expression tree).
#[derive(Debug, Default)]
pub struct OperandPool {
    operands: Vec<SmallVec<[u32; 4]>>,
    index: HashMap<Vec<u32>, u32>,
}

impl OperandPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, expressions: SmallVec<[u32; 4]>) -> u32 {
        let key: Vec<u32> = expressions.to_vec();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.operands.len() as u32;
        self.index.insert(key, id);
        self.operands.push(expressions);
        id
    }

    pub fn get(&self, id: u32) -> &[u32] {
        &self.operands[id as usize]
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.operands.iter().map(|operand| operand.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn register(name: &str) -> Expression {
        Expression {
            kind: ExpressionKind::Register,
            symbol: name.to_string(),
            immediate: 0,
            parent: None,
            position: 0,
            is_relocation: false,
        }
    }

    #[test]
    fn identical_expressions_are_interned_once() {
        let mut pool = ExpressionPool::new();
        let a = pool.intern(register("rax"));
        let b = pool.intern(register("rax"));
        let c = pool.intern(register("rbx"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn parent_distinguishes_nodes() {
        let mut pool = ExpressionPool::new();
        let root = pool.intern(register("rax"));
        let mut child = register("rax");
        child.parent = Some(root);
        let child_id = pool.intern(child);
        assert_ne!(root, child_id);
    }

    #[test]
    fn operands_are_interned_by_expression_list() {
        let mut expressions = ExpressionPool::new();
        let rax = expressions.intern(register("rax"));
        let rbx = expressions.intern(register("rbx"));

        let mut operands = OperandPool::new();
        let first = operands.intern(smallvec![rax, rbx]);
        let second = operands.intern(smallvec![rax, rbx]);
        let third = operands.intern(smallvec![rbx, rax]);
        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(operands.get(first), &[rax, rbx]);
    }
}
