//! # Expression Evaluator
//!
//! Interprets unit-definition scripts against a register bank and a variable
//! table. Evaluation never fails: unknown variables, unset registers, missing
//! arguments, unknown functions and division by zero all degrade to 0.
//!
//! ```rust
//! use hru_modbus_sim::evaluator::Evaluator;
//! use hru_modbus_sim::register_bank::RegisterBank;
//! use hru_modbus_sim::unit::{Expr, Function};
//! use hru_modbus_sim::value::Value;
//! use hru_modbus_sim::variables::VariableTable;
//!
//! let mut bank = RegisterBank::new();
//! let mut vars = VariableTable::new();
//! bank.set_register(10706, 225);
//!
//! let expr = Expr::call(
//!     Function::Multiply,
//!     vec![Expr::call(Function::ModbusReadHolding, vec![Expr::int(10706)]), Expr::Literal(Value::Float(0.1))],
//! );
//! let value = Evaluator::new(&mut bank, &mut vars).evaluate(&expr);
//! assert!((value.as_f64() - 22.5).abs() < 1e-9);
//! ```

use tracing::debug;

use crate::codec::{truncate_to_register, wrap_to_register};
use crate::front_panel::{FrontPanel, FRONT_PANEL_ADDRESS};
use crate::register_bank::RegisterBank;
use crate::state::client_write;
use crate::unit::{Expr, Function, Statement};
use crate::value::Value;
use crate::variables::VariableTable;

/// Who a script's register writes are attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrigin {
    /// The simulator itself; writes are not reconciled
    Device,
    /// A Modbus master; writes are dirty-marked and mirrored
    Client,
}

/// Script interpreter bound to one bank and variable table
#[derive(Debug)]
pub struct Evaluator<'a> {
    bank: &'a mut RegisterBank,
    vars: &'a mut VariableTable,
    origin: WriteOrigin,
}

impl<'a> Evaluator<'a> {
    /// Evaluator whose register writes are plain stores
    pub fn new(bank: &'a mut RegisterBank, vars: &'a mut VariableTable) -> Self {
        Self {
            bank,
            vars,
            origin: WriteOrigin::Device,
        }
    }

    /// Treat register writes as if a Modbus master issued them
    pub fn as_client(mut self) -> Self {
        self.origin = WriteOrigin::Client;
        self
    }

    /// Run statements in order
    pub fn execute(&mut self, statements: &[Statement]) {
        for statement in statements {
            match statement {
                Statement::Assignment { variable, value } => {
                    let result = self.evaluate(value);
                    debug!("{} = {}", variable, result);
                    self.vars.set(variable, result.as_f64());
                }
                Statement::Action { expression } => {
                    self.evaluate(expression);
                }
                Statement::Other => {}
            }
        }
    }

    /// Evaluate one expression
    pub fn evaluate(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Variable(name) => Value::Float(self.vars.get(name)),
            Expr::Call { function, args } => self.call(function, args),
        }
    }

    fn arg(&mut self, args: &[Expr], index: usize) -> Value {
        args.get(index)
            .map(|expr| self.evaluate(expr))
            .unwrap_or_default()
    }

    fn address(&mut self, args: &[Expr], index: usize) -> u16 {
        wrap_to_register(self.arg(args, index).as_i64())
    }

    fn call(&mut self, function: &Function, args: &[Expr]) -> Value {
        match function {
            Function::ModbusReadHolding | Function::ModbusReadInput => {
                let address = self.address(args, 0);
                Value::from(self.bank.get_register(address))
            }
            Function::ExcludeModbusReadCoil => Value::Int(0),
            Function::Multiply => {
                let (a, b) = (self.arg(args, 0), self.arg(args, 1));
                a.multiply(&b)
            }
            Function::Divide => {
                let (a, b) = (self.arg(args, 0), self.arg(args, 1));
                a.divide(&b)
            }
            Function::BitAnd => {
                let (a, b) = (self.arg(args, 0), self.arg(args, 1));
                Value::Int(a.as_i64() & b.as_i64())
            }
            Function::BitOr => {
                let (a, b) = (self.arg(args, 0), self.arg(args, 1));
                Value::Int(a.as_i64() | b.as_i64())
            }
            Function::BitLshift => {
                let (a, n) = (self.arg(args, 0), self.arg(args, 1));
                Value::Int(shift_amount(&n).map_or(0, |n| a.as_i64().wrapping_shl(n)))
            }
            Function::BitRshift => {
                let (a, n) = (self.arg(args, 0), self.arg(args, 1));
                Value::Int(shift_amount(&n).map_or(0, |n| a.as_i64() >> n))
            }
            Function::Round => Value::Int(self.arg(args, 0).as_f64().round_ties_even() as i64),
            Function::NonZero => Value::Bool(self.arg(args, 0).is_truthy()),
            Function::ModbusWriteHolding => {
                let address = self.address(args, 0);
                let value = self.arg(args, 1);
                self.write_register(address, to_register(&value));
                value
            }
            Function::ModbusWriteCoil => {
                let address = self.address(args, 0);
                let value = self.arg(args, 1).is_truthy();
                debug!("DSL write coil {} = {}", address, value);
                self.bank.set_coil(address, value);
                Value::Bool(value)
            }
            Function::ModbusWriteHoldingMulti => {
                let start = self.address(args, 0);
                let mut values: Vec<u16> = (1..args.len())
                    .map(|index| to_register(&self.arg(args, index)))
                    .collect();
                if values.is_empty() {
                    values.push(0);
                }
                for (offset, &value) in values.iter().enumerate() {
                    self.write_register(start.wrapping_add(offset as u16), value);
                }
                Value::Int(values.len() as i64)
            }
            Function::Delay => Value::Int(0),
            Function::Unknown(name) => {
                debug!("Unknown DSL function '{}' evaluates to 0", name);
                Value::Int(0)
            }
        }
    }

    fn write_register(&mut self, address: u16, value: u16) {
        debug!("DSL write register {} = {}", address, value);
        match self.origin {
            WriteOrigin::Client => client_write(self.bank, self.vars, address, value),
            WriteOrigin::Device => {
                self.bank.set_register(address, value);
                if address == FRONT_PANEL_ADDRESS {
                    FrontPanel::unpack(value).apply(self.vars);
                }
            }
        }
    }
}

fn to_register(value: &Value) -> u16 {
    match value {
        Value::Float(v) => truncate_to_register(*v),
        other => wrap_to_register(other.as_i64()),
    }
}

fn shift_amount(n: &Value) -> Option<u32> {
    u32::try_from(n.as_i64()).ok().filter(|&n| n < 64)
}
