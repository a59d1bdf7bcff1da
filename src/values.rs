//! Scalar values which form a computation graph
use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::backprop_fns::{
    BackpropFunc, update_gradients_one_operand, update_gradients_two_operands,
};

type SharedValue = Rc<RefCell<InnerValue>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Newtype representing a shared value in a computation graph
///
/// Cloning a `Value` clones the handle, not the node: both handles observe the same
/// data and gradient.
#[derive(Debug, Clone)]
pub struct Value(pub(crate) SharedValue);

impl Value {
    /// Create a new value, not derived from any other values
    pub fn new(data: f32) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(data, None))))
    }

    /// Create a new value derived from an operation on other values (i.e. not a leaf node)
    fn new_derived(data: f32, backprop_fn: BackpropFunc, children: Vec<&Value>) -> Self {
        let mut inner = InnerValue::new(data, Some(backprop_fn));
        inner.children = children.into_iter().map(|c| c.0.clone()).collect();
        Self(Rc::new(RefCell::new(inner)))
    }

    pub fn data(&self) -> f32 {
        self.0.borrow().data
    }

    pub fn grad(&self) -> f32 {
        self.0.borrow().grad
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn backprop_fn(&self) -> Option<BackpropFunc> {
        self.0.borrow().backprop_fn
    }

    /// Leaf nodes have no recorded history
    pub fn is_leaf(&self) -> bool {
        self.0.borrow().children.is_empty()
    }

    /// Inputs which produced this value in the forward pass
    pub fn children(&self) -> Vec<Value> {
        self.0.borrow().children.iter().cloned().map(Value).collect()
    }

    // Strictly, &mut isn't needed since the value is behind a shared mutable type,
    // but it indicates that the value should be excusively mutable
    pub fn set_data(&mut self, data: f32) {
        self.0.borrow_mut().data = data;
    }

    /// A new leaf holding the same data, cut off from the computation graph
    pub fn detach(&self) -> Value {
        Value::new(self.data())
    }

    /// Unlike PyTorch which only zeros out the gradients of the leaf nodes, this zeros out
    /// all gradients in the computation graph which are children of this node
    pub fn zero_grad(&mut self) {
        for value in self.topological_order() {
            value.0.borrow_mut().grad = 0.0;
        }
    }

    /// Reverse-mode differentiation of this value with respect to every node below it.
    ///
    /// Gradients are added to whatever each node already holds. Calling `backward` twice
    /// without zeroing the gradients in between doubles them.
    pub fn backward(&self) {
        // d out / d out = 1
        self.0.borrow_mut().grad = 1.0;

        // apply backprop, reversed to start from root first
        for value in self.topological_order().into_iter().rev() {
            let children = value.children();
            if let Some(f) = value.backprop_fn() {
                debug_assert!(f.n_operands() == children.len());
            }
            match children.as_slice() {
                [] => {}
                [in1] => update_gradients_one_operand(in1, &value),
                [in1, in2] => update_gradients_two_operands(in1, in2, &value),
                _ => {
                    panic!("Unsupported number of operands: {}", children.len());
                }
            }
        }
    }

    /// Post order over the graph below this node, children before parents.
    ///
    /// Iterative so that long chains (e.g. sums over wide layers) do not exhaust the stack.
    pub(crate) fn topological_order(&self) -> Vec<Value> {
        let mut order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack = vec![(self.clone(), false)];

        while let Some((value, expanded)) = stack.pop() {
            if expanded {
                order.push(value);
                continue;
            }
            if !visited.insert(value.id()) {
                continue;
            }
            let children = value.children();
            stack.push((value, true));
            for child in children {
                if !visited.contains(&child.id()) {
                    stack.push((child, false));
                }
            }
        }
        order
    }
}

// Various operations on values
impl Value {
    pub fn pow(&self, other: &Value) -> Value {
        Value::new_derived(
            self.data().powf(other.data()),
            BackpropFunc::Pow,
            vec![self, other],
        )
    }

    pub fn relu(&self) -> Value {
        Value::new_derived(self.data().max(0.0), BackpropFunc::ReLU, vec![self])
    }

    pub fn exp(&self) -> Value {
        Value::new_derived(self.data().exp(), BackpropFunc::Exp, vec![self])
    }

    /// Natural logarithm
    pub fn ln(&self) -> Value {
        Value::new_derived(self.data().ln(), BackpropFunc::Ln, vec![self])
    }
}

// pretty print a value and its children recursively in a JSON-like format
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_value(value: &Value, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let inner = value.0.borrow();
            let indent_str = " ".repeat(indent);
            let indent_inner = " ".repeat(indent + 2);
            writeln!(f, "{}{{", indent_str)?;
            writeln!(f, "{}\"data\": {},", indent_inner, inner.data)?;
            writeln!(f, "{}\"grad\": {},", indent_inner, inner.grad)?;
            writeln!(f, "{}\"id\": {},", indent_inner, inner.id)?;
            writeln!(
                f,
                "{}\"backprop_fn\": {:?},",
                indent_inner, inner.backprop_fn
            )?;
            writeln!(f, "{}\"children\": [", indent_inner)?;
            for (i, child) in inner.children.iter().enumerate() {
                let child_value = Value(child.clone());
                fmt_value(&child_value, indent + 4, f)?;
                if i < inner.children.len() - 1 {
                    writeln!(f, ",")?;
                } else {
                    writeln!(f)?;
                }
            }
            writeln!(f, "{}]", indent_inner)?;
            write!(f, "{}}}", indent_str)
        }
        fmt_value(self, 0, f)
    }
}

impl Add for &Value {
    type Output = Value;

    fn add(self, other: &Value) -> Value {
        Value::new_derived(self.data() + other.data(), BackpropFunc::Add, vec![self, other])
    }
}

impl Sub for &Value {
    type Output = Value;

    fn sub(self, other: &Value) -> Value {
        Value::new_derived(self.data() - other.data(), BackpropFunc::Sub, vec![self, other])
    }
}

impl Mul for &Value {
    type Output = Value;

    fn mul(self, other: &Value) -> Value {
        Value::new_derived(self.data() * other.data(), BackpropFunc::Mul, vec![self, other])
    }
}

impl Div for &Value {
    type Output = Value;

    fn div(self, other: &Value) -> Value {
        let data = if other.data().is_nan() {
            0.0
        } else {
            self.data() / other.data()
        };
        Value::new_derived(data, BackpropFunc::Div, vec![self, other])
    }
}

impl Neg for &Value {
    type Output = Value;

    fn neg(self) -> Value {
        Value::new_derived(-self.data(), BackpropFunc::Neg, vec![self])
    }
}

impl Sum for Value {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Value::new(0.0), |acc, v| acc + v)
    }
}

/// Convenience macro to implement operations on `[Value]` when ownership can be transferred
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt, $struct:ident) => {
        impl $trait for $struct {
            type Output = Self;

            fn $trait_method(self, other: Self) -> Self {
                &self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +, Value);
impl_arithmetic!(Sub, sub, -, Value);
impl_arithmetic!(Mul, mul, *, Value);
impl_arithmetic!(Div, div, /, Value);

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data() == other.data()
    }
}

// unfortunate that there isn't a blanket impl for AsRef<T> for T
// <https://doc.rust-lang.org/std/convert/trait.AsRef.html#reflexivity>
impl AsRef<Value> for Value {
    fn as_ref(&self) -> &Value {
        self
    }
}

#[derive(Debug)]
pub(crate) struct InnerValue {
    // the network uses 32 bit precision floats (roughly 7 decimal digits of precision)
    pub(crate) data: f32,
    /// gradient of the value with respect to the output
    pub(crate) grad: f32,
    /// List of the node inputs in the forward pass
    /// These nodes are "children" in the backwards pass
    children: Vec<SharedValue>,
    /// Unique identifier for the node
    id: u64,
    /// The function which created this value from its children
    /// `None` when the value is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

impl InnerValue {
    fn new(data: f32, backprop_fn: Option<BackpropFunc>) -> Self {
        Self {
            data,
            grad: 0.0,
            children: vec![],
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            backprop_fn,
        }
    }
}

// The default drop glue recurses once per graph level, which overflows on long chains.
// Unlink uniquely owned children onto a heap stack instead.
impl Drop for InnerValue {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(child) = stack.pop() {
            if let Ok(cell) = Rc::try_unwrap(child) {
                let mut inner = cell.into_inner();
                stack.append(&mut inner.children);
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Compares floats with an absolute tolerance, `1e-6` unless given
    #[macro_export]
    macro_rules! assert_eq_float {
        ($a:expr, $b:expr) => {
            $crate::assert_eq_float!($a, $b, 1e-6)
        };
        ($a:expr, $b:expr, $tol:expr) => {{
            let (a, b): (f32, f32) = ($a, $b);
            assert!((a - b).abs() < $tol, "{} != {} (tolerance {})", a, b, $tol);
        }};
    }

    #[test]
    fn test_add() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a + &b;
        assert_eq!(c.data(), 5.0);
        c.backward();

        // dc/da = 1
        // dc/db = 1
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_mul() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a * &b;
        assert_eq!(c.data(), 6.0);

        c.backward();

        // dc/da = b
        // dc/db = a
        assert_eq!(a.grad(), 3.0);
        assert_eq!(b.grad(), 2.0);
    }

    #[test]
    fn test_square_through_shared_operand() {
        let a = Value::new(3.0);
        let c = &a * &a;
        c.backward();
        assert_eq!(a.grad(), 6.0);
    }

    #[test]
    fn test_sub_and_neg() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = -&(&a - &b);
        assert_eq!(c.data(), 1.0);

        c.backward();

        assert_eq!(a.grad(), -1.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_div() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a / &b;
        assert_eq_float!(c.data(), 2.0 / 3.0);

        c.backward();

        // dc/da = 1/b
        // dc/db = -a/b^2
        assert_eq_float!(a.grad(), 1.0 / 3.0);
        assert_eq_float!(b.grad(), -2.0 / 9.0);
    }

    #[test]
    fn test_pow() {
        let a = Value::new(2.0);
        let b = Value::new(2.0);
        let c = a.pow(&b);
        assert_eq_float!(c.data(), 4.0);

        c.backward();

        // dc/da = 2a, exponent gets no gradient
        assert_eq_float!(a.grad(), 4.0);
        assert_eq_float!(b.grad(), 0.0);
    }

    #[test]
    fn test_exp_ln() {
        let a = Value::new(2.0);
        let b = a.exp().ln();
        assert_eq_float!(b.data(), 2.0, 1e-5);

        b.backward();

        // d ln(exp(a)) / da = 1
        assert_eq_float!(a.grad(), 1.0, 1e-5);
    }

    #[test]
    fn test_relu() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a * &b;
        let z = c.relu();
        assert_eq_float!(z.data(), 2.0);

        z.backward();

        // dz/dc = 1
        // dc/da = b
        // dc/db = a
        assert_eq_float!(a.grad(), 2.0);
        assert_eq_float!(b.grad(), 1.0);
        assert_eq_float!(c.grad(), 1.0);

        let d = Value::new(-1.0);
        let e = d.relu();
        e.backward();
        assert_eq!(e.data(), 0.0);
        assert_eq!(d.grad(), 0.0);
    }

    #[test]
    fn test_gradients_accumulate_across_backward_passes() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        (&a * &b).backward();
        (&a * &b).backward();
        assert_eq!(a.grad(), 6.0);

        let mut a_handle = a.clone();
        a_handle.zero_grad();
        (&a * &b).backward();
        assert_eq!(a.grad(), 3.0);
    }

    #[test]
    fn test_zero_grad_clears_subgraph() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);
        let mut c = &(&a * &b) + &a;
        c.backward();
        assert_eq!(a.grad(), 4.0);

        c.zero_grad();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
        assert_eq!(c.grad(), 0.0);
    }

    #[test]
    fn test_detach_has_no_history() {
        let a = Value::new(2.0);
        let b = &a * &a;
        let d = b.detach();
        assert!(d.is_leaf());
        assert_eq!(d.data(), 4.0);

        d.backward();
        assert_eq!(a.grad(), 0.0);
    }

    #[test]
    fn test_display_nests_children() {
        let a = Value::new(2.0);
        let b = a.exp();
        let printed = b.to_string();
        assert!(printed.contains("\"backprop_fn\": Some(Exp)"));
        assert!(printed.contains("\"backprop_fn\": None"));
        assert!(printed.contains(&format!("\"id\": {}", a.id())));
    }

    #[test]
    fn test_long_chain_backward() {
        let x = Value::new(1.0);
        let total = (0..100_000).map(|_| x.clone()).sum::<Value>();
        total.backward();
        assert_eq!(x.grad(), 100_000.0);
    }
}
