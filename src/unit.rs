//! # Unit Definitions
//!
//! A unit definition describes how a particular heat-recovery unit exposes
//! its state over Modbus, as two kinds of scripts:
//!
//! - the **read** script: assignments that decode registers into variables
//!   (`$temperature = multiply(modbus_read_holding(10706), 0.1)`)
//! - one or more **write** scripts: actions a master performs to command the
//!   unit (`modbus_write_holding(10702, 0)`, `delay(500)`, ...)
//!
//! ## JSON schema
//!
//! ```json
//! {
//!   "name": "Atrea RD5 CF",
//!   "code": "atrea-rd5-cf",
//!   "reconciliation": "trigger",
//!   "integration": {
//!     "read": [
//!       { "type": "assignment", "variable": "$power",
//!         "value": { "function": "modbus_read_holding", "args": [10704] } }
//!     ],
//!     "write": {
//!       "power": [
//!         { "type": "action", "expression": { "function": "modbus_write_holding", "args": [10700, 0] } }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! `write` may also be a bare statement list, and older definitions use
//! `interface` instead of `integration`. `reconciliation` is optional; see
//! [`crate::reconcile`] for how it is inferred when absent.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ModbusError, ModbusResult};
use crate::value::Value;

// ============================================================================
// Functions
// ============================================================================

/// DSL function identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Function {
    /// `modbus_read_holding(addr)`
    ModbusReadHolding,
    /// `modbus_read_input(addr)`, same store as holding registers
    ModbusReadInput,
    /// Coil reads are not simulated; always 0
    ExcludeModbusReadCoil,
    /// `multiply(a, b)`
    Multiply,
    /// `divide(a, b)`, 0 on division by zero
    Divide,
    /// `bit_and(a, b)`
    BitAnd,
    /// `bit_or(a, b)`
    BitOr,
    /// `bit_lshift(a, n)`
    BitLshift,
    /// `bit_rshift(a, n)`
    BitRshift,
    /// `round(a)`
    Round,
    /// `non_zero(a)`
    NonZero,
    /// `modbus_write_holding(addr, value)`
    ModbusWriteHolding,
    /// `modbus_write_coil(addr, value)`
    ModbusWriteCoil,
    /// `modbus_write_holding_multi(addr, v0, v1, ...)`
    ModbusWriteHoldingMulti,
    /// `delay(ms)`, a marker only
    Delay,
    /// Anything else; evaluates to 0
    Unknown(String),
}

/// Name lookup table for [`Function::from_name`]
const FUNCTION_TABLE: &[(&str, Function)] = &[
    ("modbus_read_holding", Function::ModbusReadHolding),
    ("modbus_read_input", Function::ModbusReadInput),
    ("exclude_modbus_read_coil", Function::ExcludeModbusReadCoil),
    ("multiply", Function::Multiply),
    ("divide", Function::Divide),
    ("bit_and", Function::BitAnd),
    ("bit_or", Function::BitOr),
    ("bit_lshift", Function::BitLshift),
    ("bit_rshift", Function::BitRshift),
    ("round", Function::Round),
    ("non_zero", Function::NonZero),
    ("modbus_write_holding", Function::ModbusWriteHolding),
    ("modbus_write_coil", Function::ModbusWriteCoil),
    ("modbus_write_holding_multi", Function::ModbusWriteHoldingMulti),
    ("delay", Function::Delay),
];

impl Function {
    /// Resolve a JSON function name
    pub fn from_name(name: &str) -> Self {
        FUNCTION_TABLE
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, function)| function.clone())
            .unwrap_or_else(|| Function::Unknown(name.to_string()))
    }

    /// JSON function name
    pub fn name(&self) -> &str {
        match self {
            Function::Unknown(name) => name,
            known => FUNCTION_TABLE
                .iter()
                .find(|(_, function)| function == known)
                .map(|(name, _)| *name)
                .unwrap_or("unknown"),
        }
    }

    /// Whether evaluating the call mutates registers or coils
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            Function::ModbusWriteHolding
                | Function::ModbusWriteCoil
                | Function::ModbusWriteHoldingMulti
        )
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Expressions and statements
// ============================================================================

/// Expression tree node
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawExpr")]
pub enum Expr {
    /// Number, boolean, hex string (already parsed) or plain string
    Literal(Value),
    /// `$name` reference into the variable table
    Variable(String),
    /// Function call
    Call { function: Function, args: Vec<Expr> },
}

impl Expr {
    /// Convenience constructor for calls
    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Expr::Call { function, args }
    }

    /// Integer literal
    pub fn int(value: i64) -> Self {
        Expr::Literal(Value::Int(value))
    }

    /// Address this expression denotes without evaluation, if it is a
    /// numeric or hex literal
    pub fn literal_address(&self) -> Option<u16> {
        match self {
            Expr::Literal(Value::Text(text)) => text.trim().parse::<i64>().ok().map(|v| v as u16),
            Expr::Literal(value) => Some(value.as_i64() as u16),
            _ => None,
        }
    }

    /// Numeric value of a literal, `None` for anything else
    pub fn literal_number(&self) -> Option<f64> {
        match self {
            Expr::Literal(Value::Text(_)) => None,
            Expr::Literal(value) => Some(value.as_f64()),
            _ => None,
        }
    }

    /// Function of a call node
    pub fn function(&self) -> Option<&Function> {
        match self {
            Expr::Call { function, .. } => Some(function),
            _ => None,
        }
    }

    /// Arguments of a call node, empty otherwise
    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Call { args, .. } => args,
            _ => &[],
        }
    }
}

/// Wire shape of an expression before typing
#[derive(Deserialize)]
#[serde(untagged)]
enum RawExpr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Call {
        function: String,
        #[serde(default)]
        args: Vec<RawExpr>,
    },
    Other(IgnoredAny),
}

impl From<RawExpr> for Expr {
    fn from(raw: RawExpr) -> Self {
        match raw {
            RawExpr::Bool(b) => Expr::Literal(Value::Bool(b)),
            RawExpr::Int(v) => Expr::Literal(Value::Int(v)),
            RawExpr::Float(v) => Expr::Literal(Value::Float(v)),
            RawExpr::Text(text) => parse_text(text),
            RawExpr::Call { function, args } => Expr::Call {
                function: Function::from_name(&function),
                args: args.into_iter().map(Expr::from).collect(),
            },
            RawExpr::Other(_) => Expr::Literal(Value::Int(0)),
        }
    }
}

fn parse_text(text: String) -> Expr {
    if text.starts_with('$') {
        return Expr::Variable(text);
    }
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .and_then(|digits| i64::from_str_radix(digits, 16).ok());
    match hex {
        Some(value) => Expr::Literal(Value::Int(value)),
        None => Expr::Literal(Value::Text(text)),
    }
}

/// One script line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Statement {
    /// `variable = value`
    Assignment { variable: String, value: Expr },
    /// Evaluated for its side effect
    Action { expression: Expr },
    /// Statement kinds the simulator does not interpret
    #[serde(other)]
    Other,
}

impl Statement {
    /// Expression of an action statement
    pub fn action(&self) -> Option<&Expr> {
        match self {
            Statement::Action { expression } => Some(expression),
            _ => None,
        }
    }
}

// ============================================================================
// Unit definition
// ============================================================================

/// How reconciliation interprets client writes for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationMode {
    /// A control register written to 0 arms a setpoint register
    Trigger,
    /// Mapped registers apply immediately
    Direct,
}

impl fmt::Display for ReconciliationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationMode::Trigger => f.write_str("trigger"),
            ReconciliationMode::Direct => f.write_str("direct"),
        }
    }
}

/// A named write script
#[derive(Debug, Clone, PartialEq)]
pub struct CommandGroup {
    /// Group name (`default` for a bare statement list)
    pub name: String,
    /// Script body
    pub statements: Vec<Statement>,
}

impl CommandGroup {
    /// Whether the script contains a `delay` action
    pub fn has_delay_marker(&self) -> bool {
        self.statements
            .iter()
            .filter_map(Statement::action)
            .any(|expr| expr.function() == Some(&Function::Delay))
    }

    /// Literal register addresses written by the script, in script order
    pub fn write_addresses(&self) -> Vec<u16> {
        self.statements
            .iter()
            .filter_map(Statement::action)
            .filter(|expr| {
                matches!(
                    expr.function(),
                    Some(Function::ModbusWriteHolding | Function::ModbusWriteHoldingMulti)
                )
            })
            .filter_map(|expr| expr.args().first().and_then(Expr::literal_address))
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawWrite {
    Script(Vec<Statement>),
    Groups(BTreeMap<String, Vec<Statement>>),
}

#[derive(Deserialize)]
struct RawInterface {
    #[serde(default)]
    read: Vec<Statement>,
    #[serde(default)]
    write: Option<RawWrite>,
}

#[derive(Deserialize)]
struct RawUnitDefinition {
    name: String,
    code: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    reconciliation: Option<ReconciliationMode>,
    #[serde(default)]
    integration: Option<RawInterface>,
    #[serde(default)]
    interface: Option<RawInterface>,
}

/// Immutable description of a simulated unit
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawUnitDefinition")]
pub struct UnitDefinition {
    /// Display name
    pub name: String,
    /// Short identifier used to select the unit
    pub code: String,
    /// Free text
    pub description: Option<String>,
    /// Declared reconciliation mode, if any
    pub reconciliation: Option<ReconciliationMode>,
    read: Vec<Statement>,
    write: Vec<CommandGroup>,
}

impl TryFrom<RawUnitDefinition> for UnitDefinition {
    type Error = String;

    fn try_from(raw: RawUnitDefinition) -> Result<Self, Self::Error> {
        let interface = raw
            .integration
            .or(raw.interface)
            .ok_or_else(|| format!("unit '{}' has neither 'integration' nor 'interface'", raw.code))?;

        let write = match interface.write {
            None => Vec::new(),
            Some(RawWrite::Script(statements)) => vec![CommandGroup {
                name: "default".to_string(),
                statements,
            }],
            Some(RawWrite::Groups(groups)) => groups
                .into_iter()
                .map(|(name, statements)| CommandGroup { name, statements })
                .collect(),
        };

        Ok(Self {
            name: raw.name,
            code: raw.code,
            description: raw.description,
            reconciliation: raw.reconciliation,
            read: interface.read,
            write,
        })
    }
}

impl UnitDefinition {
    /// Build a definition in code
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        read: Vec<Statement>,
        write: Vec<CommandGroup>,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            description: None,
            reconciliation: None,
            read,
            write,
        }
    }

    /// Declare the reconciliation mode explicitly
    pub fn with_reconciliation(mut self, mode: ReconciliationMode) -> Self {
        self.reconciliation = Some(mode);
        self
    }

    /// Parse a definition from JSON text
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        serde_json::from_str(json).map_err(ModbusError::from)
    }

    /// Parse a definition from a JSON reader
    pub fn from_reader<R: Read>(reader: R) -> ModbusResult<Self> {
        serde_json::from_reader(reader).map_err(ModbusError::from)
    }

    /// Read script
    pub fn read_script(&self) -> &[Statement] {
        &self.read
    }

    /// Write scripts
    pub fn write_groups(&self) -> &[CommandGroup] {
        &self.write
    }

    /// Write script by name
    pub fn write_group(&self, name: &str) -> Option<&CommandGroup> {
        self.write.iter().find(|group| group.name == name)
    }

    /// Variables assigned by the read script, in script order
    pub fn read_variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for statement in &self.read {
            if let Statement::Assignment { variable, .. } = statement {
                if !names.contains(&variable.as_str()) {
                    names.push(variable);
                }
            }
        }
        names
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load the unit `code` from `<definitions>/units`.
///
/// `<code>.json` is tried first; otherwise every `*.json` file is parsed and
/// the one whose `code` field matches is returned. Files that fail to parse
/// during the scan are skipped.
pub fn load_unit(definitions: &Path, code: &str) -> ModbusResult<UnitDefinition> {
    let units_dir = definitions.join("units");
    let direct = units_dir.join(format!("{code}.json"));

    if direct.is_file() {
        debug!("Loading unit definition {}", direct.display());
        let unit = UnitDefinition::from_reader(BufReader::new(fs::File::open(&direct)?))?;
        info!("Loaded unit '{}' ({})", unit.name, unit.code);
        return Ok(unit);
    }

    let entries = fs::read_dir(&units_dir).map_err(|e| {
        ModbusError::unit_definition(format!("cannot list {}: {}", units_dir.display(), e))
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::File::open(&path)
            .map_err(ModbusError::from)
            .and_then(|file| UnitDefinition::from_reader(BufReader::new(file)));
        match parsed {
            Ok(unit) if unit.code == code => {
                info!("Loaded unit '{}' ({}) from {}", unit.name, unit.code, path.display());
                return Ok(unit);
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }

    Err(ModbusError::unit_definition(format!(
        "unit definition for '{}' not found in {}",
        code,
        units_dir.display()
    )))
}
