use serde::{Deserialize, Serialize};

// 查询层下推给存储的过滤条件, 读取层不解释它 只负责原样转发
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Predicate {
    pub root: Node,
}

impl Predicate {
    pub fn new(root: Node) -> Self {
        Self { root }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    StartsWith,
    Regex,
    NotRegex,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Node {
    Logical {
        op: LogicalOp,
        children: Vec<Node>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Paren(Box<Node>),
    TagRef(String),
    FieldRef(String),
    StringValue(String),
    RegexValue(String),
    IntegerValue(i64),
    UnsignedValue(u64),
    FloatValue(f64),
    BooleanValue(bool),
}

impl Node {
    pub fn tag_equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Comparison {
            op: ComparisonOp::Equal,
            left: Box::new(Self::TagRef(key.into())),
            right: Box::new(Self::StringValue(value.into())),
        }
    }
}
