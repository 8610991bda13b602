//! Scalar, aggregate and window expressions used inside plan nodes.

/// Literal constant
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    /// Equality where NULL matches NULL (rendered per dialect)
    NullSafeEq,
}

impl BinaryOp {
    /// SQL token for operators with a portable spelling
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::NullSafeEq => "IS NOT DISTINCT FROM",
        }
    }
}

/// Scalar functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sqrt,
    Abs,
    Ceil,
    /// Round to an integral value
    Round,
    Coalesce,
    NullIf,
}

/// Aggregate functions (also usable as window functions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ORDER BY key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: SortDirection,
}

impl OrderItem {
    pub fn asc(expr: Expr) -> Self {
        OrderItem {
            expr,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        OrderItem {
            expr,
            direction: SortDirection::Desc,
        }
    }
}

/// Window specification: `OVER (PARTITION BY ... ORDER BY ...)`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Window {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
}

impl Window {
    pub fn partition_by(columns: Vec<Expr>) -> Self {
        Window {
            partition_by: columns,
            order_by: Vec::new(),
        }
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }
}

/// Function evaluated over a window
#[derive(Debug, Clone, PartialEq)]
pub enum WindowFunction {
    RowNumber,
    /// Aggregate over the partition; `None` argument means `*`
    Aggregate(AggregateFunction, Option<Box<Expr>>),
}

/// Portable SQL types used in casts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    String,
    Double,
    Int,
}

/// Column reference, optionally qualified by a source alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Literal),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Function {
        func: Function,
        args: Vec<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Grouped aggregate; `None` argument means `*`
    Aggregate {
        func: AggregateFunction,
        arg: Option<Box<Expr>>,
    },
    Window {
        func: WindowFunction,
        window: Window,
    },
    Cast {
        expr: Box<Expr>,
        to: SqlType,
    },
}

/// Unqualified column reference
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(ColumnRef {
        table: None,
        name: name.into(),
    })
}

/// Column reference qualified by a source alias
pub fn qcol(table: impl Into<String>, name: impl Into<String>) -> Expr {
    Expr::Column(ColumnRef {
        table: Some(table.into()),
        name: name.into(),
    })
}

pub fn lit_int(value: i64) -> Expr {
    Expr::Literal(Literal::Int(value))
}

pub fn lit_float(value: f64) -> Expr {
    Expr::Literal(Literal::Float(value))
}

impl Expr {
    fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    fn call(func: Function, args: Vec<Expr>) -> Expr {
        Expr::Function { func, args }
    }

    pub fn plus(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Add, right)
    }

    pub fn minus(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Sub, right)
    }

    pub fn times(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Mul, right)
    }

    pub fn div(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Div, right)
    }

    pub fn eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn ne(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn le(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Le, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn ge(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Ge, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Or, right)
    }

    pub fn null_safe_eq(self, right: Expr) -> Expr {
        self.binary(BinaryOp::NullSafeEq, right)
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn sqrt(self) -> Expr {
        Expr::call(Function::Sqrt, vec![self])
    }

    pub fn abs(self) -> Expr {
        Expr::call(Function::Abs, vec![self])
    }

    pub fn ceil(self) -> Expr {
        Expr::call(Function::Ceil, vec![self])
    }

    pub fn round(self) -> Expr {
        Expr::call(Function::Round, vec![self])
    }

    pub fn coalesce(self, fallback: Expr) -> Expr {
        Expr::call(Function::Coalesce, vec![self, fallback])
    }

    pub fn null_if(self, value: Expr) -> Expr {
        Expr::call(Function::NullIf, vec![self, value])
    }

    pub fn cast(self, to: SqlType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            to,
        }
    }

    pub fn sum(self) -> Expr {
        Expr::Aggregate {
            func: AggregateFunction::Sum,
            arg: Some(Box::new(self)),
        }
    }

    pub fn avg(self) -> Expr {
        Expr::Aggregate {
            func: AggregateFunction::Avg,
            arg: Some(Box::new(self)),
        }
    }

    pub fn count_star() -> Expr {
        Expr::Aggregate {
            func: AggregateFunction::Count,
            arg: None,
        }
    }

    pub fn sum_over(self, window: Window) -> Expr {
        Expr::Window {
            func: WindowFunction::Aggregate(AggregateFunction::Sum, Some(Box::new(self))),
            window,
        }
    }

    pub fn avg_over(self, window: Window) -> Expr {
        Expr::Window {
            func: WindowFunction::Aggregate(AggregateFunction::Avg, Some(Box::new(self))),
            window,
        }
    }

    pub fn count_over(window: Window) -> Expr {
        Expr::Window {
            func: WindowFunction::Aggregate(AggregateFunction::Count, None),
            window,
        }
    }

    pub fn row_number_over(window: Window) -> Expr {
        Expr::Window {
            func: WindowFunction::RowNumber,
            window,
        }
    }

    /// Rounds to 15 decimal digits by scaling, rounding and rescaling, so
    /// results stay stable across engines' floating-point paths.
    pub fn round_15(self) -> Expr {
        let scale = 1e15;
        self.times(lit_float(scale)).round().div(lit_float(scale))
    }

    /// Column name this expression would expose without an alias
    pub fn implied_name(&self) -> Option<&str> {
        match self {
            Expr::Column(column) => Some(&column.name),
            Expr::Cast { expr, .. } => expr.implied_name(),
            _ => None,
        }
    }

    /// Collect every column referenced by this expression
    pub fn column_refs<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(column) => out.push(column),
            Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.column_refs(out);
                right.column_refs(out);
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.column_refs(out);
                }
            }
            Expr::IsNull { expr, .. } | Expr::Cast { expr, .. } => expr.column_refs(out),
            Expr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.column_refs(out);
                }
            }
            Expr::Window { func, window } => {
                if let WindowFunction::Aggregate(_, Some(arg)) = func {
                    arg.column_refs(out);
                }
                for expr in &window.partition_by {
                    expr.column_refs(out);
                }
                for item in &window.order_by {
                    item.expr.column_refs(out);
                }
            }
        }
    }
}
