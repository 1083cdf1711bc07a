use std::fmt::{self, Display};

/// 张量的二元（或多元）运算符
#[derive(Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    AddAssign,
    Sub,
    Mul,
    Concat,
    CopyFrom,
}
impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation_name = match self {
            Operator::Add => "相加",
            Operator::AddAssign => "自相加",
            Operator::Sub => "相减",
            Operator::Mul => "相乘",
            Operator::Concat => "拼接",
            Operator::CopyFrom => "原地拷贝",
        };
        write!(f, "{}", operation_name)
    }
}
