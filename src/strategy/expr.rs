//! Rule predicate language.
//!
//! Predicates are small boolean expressions over a fixed set of metadata
//! fields, e.g. `price < 150 and (cash > 2000 or not holding)`.
//!
//! Grammar:
//! ```text
//! expr    := or
//! or      := and (("or" | "||") and)*
//! and     := unary (("and" | "&&") unary)*
//! unary   := ("not" | "!") unary | primary
//! primary := "(" expr ")" | "true" | "false" | flag | operand cmp operand
//! operand := number | field
//! cmp     := "<" | "<=" | ">" | ">=" | "==" | "!="
//! ```
//!
//! Sources are parsed once per rule and cached in [`PredicateCache`].

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::RuleId;
use crate::error::{Result, RulebotError};

/// Numeric metadata fields a predicate can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Price,
    Shares,
    BoughtShares,
    SoldShares,
    HeldShares,
    BuyPrice,
    RiskValue,
    ProfitValue,
    GainPct,
    RiskPct,
    ProfitPct,
    Cash,
    Equity,
    BuyingPower,
    SecondsToClose,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "price" | "last_price" => Field::Price,
            "shares" | "quantity" => Field::Shares,
            "bought_shares" => Field::BoughtShares,
            "sold_shares" => Field::SoldShares,
            "held_shares" => Field::HeldShares,
            "buy_price" => Field::BuyPrice,
            "risk_value" => Field::RiskValue,
            "profit_value" => Field::ProfitValue,
            "gain_pct" => Field::GainPct,
            "risk_pct" => Field::RiskPct,
            "profit_pct" => Field::ProfitPct,
            "cash" => Field::Cash,
            "equity" => Field::Equity,
            "buying_power" => Field::BuyingPower,
            "seconds_to_close" => Field::SecondsToClose,
            _ => return None,
        };
        Some(field)
    }
}

/// Boolean metadata fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    MarketOpen,
    Holding,
    TargetReached,
}

impl Flag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "market_open" => Some(Flag::MarketOpen),
            "holding" => Some(Flag::Holding),
            "target_reached" => Some(Flag::TargetReached),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(&self, left: Decimal, right: Decimal) -> bool {
        match self {
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(Field),
    Number(Decimal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(bool),
    Flag(Flag),
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

/// Fixed-shape record predicates are evaluated against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub price: Decimal,
    pub shares: u64,
    pub bought_shares: u64,
    pub sold_shares: u64,
    pub buy_price: Option<Decimal>,
    pub risk_value: Option<Decimal>,
    pub profit_value: Option<Decimal>,
    pub gain_pct: Option<Decimal>,
    pub risk_pct: Decimal,
    pub profit_pct: Decimal,
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub seconds_to_close: i64,
    pub market_open: bool,
    pub holding: bool,
    pub target_reached: bool,
}

impl Metadata {
    /// Missing values (e.g. buy price while flat) make any comparison false
    pub fn field(&self, field: Field) -> Option<Decimal> {
        match field {
            Field::Price => Some(self.price),
            Field::Shares => Some(Decimal::from(self.shares)),
            Field::BoughtShares => Some(Decimal::from(self.bought_shares)),
            Field::SoldShares => Some(Decimal::from(self.sold_shares)),
            Field::HeldShares => Some(Decimal::from(
                self.bought_shares.saturating_sub(self.sold_shares),
            )),
            Field::BuyPrice => self.buy_price,
            Field::RiskValue => self.risk_value,
            Field::ProfitValue => self.profit_value,
            Field::GainPct => self.gain_pct,
            Field::RiskPct => Some(self.risk_pct),
            Field::ProfitPct => Some(self.profit_pct),
            Field::Cash => Some(self.cash),
            Field::Equity => Some(self.equity),
            Field::BuyingPower => Some(self.buying_power),
            Field::SecondsToClose => Some(Decimal::from(self.seconds_to_close)),
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::MarketOpen => self.market_open,
            Flag::Holding => self.holding,
            Flag::TargetReached => self.target_reached,
        }
    }
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr> {
        let mut parser = Parser::new(source);
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.pos < source.len() {
            return Err(parser.error(format!("unexpected '{}'", parser.peek_word())));
        }
        Ok(expr)
    }

    pub fn evaluate(&self, meta: &Metadata) -> bool {
        match self {
            Expr::Literal(value) => *value,
            Expr::Flag(flag) => meta.flag(*flag),
            Expr::Compare { left, op, right } => {
                match (resolve(left, meta), resolve(right, meta)) {
                    (Some(l), Some(r)) => op.apply(l, r),
                    _ => false,
                }
            }
            Expr::And(exprs) => exprs.iter().all(|e| e.evaluate(meta)),
            Expr::Or(exprs) => exprs.iter().any(|e| e.evaluate(meta)),
            Expr::Not(inner) => !inner.evaluate(meta),
        }
    }
}

impl FromStr for Expr {
    type Err = RulebotError;

    fn from_str(s: &str) -> Result<Self> {
        Expr::parse(s)
    }
}

fn resolve(operand: &Operand, meta: &Metadata) -> Option<Decimal> {
    match operand {
        Operand::Number(n) => Some(*n),
        Operand::Field(f) => meta.field(*f),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn error(&self, message: String) -> RulebotError {
        RulebotError::InvalidPredicate {
            message,
            position: self.pos,
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    /// Consume `keyword` if it appears as a whole word (or as a symbol token)
    fn consume(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let rest = self.remaining();
        if !rest.starts_with(keyword) {
            return false;
        }
        let is_word = keyword.chars().all(|c| c.is_alphabetic());
        if is_word {
            let boundary = rest[keyword.len()..]
                .chars()
                .next()
                .map(|c| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(true);
            if !boundary {
                return false;
            }
        }
        self.pos += keyword.len();
        true
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while self.consume("or") || self.consume("||") {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_unary()?];
        while self.consume("and") || self.consume("&&") {
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.consume("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        // `!` but not `!=`
        self.skip_whitespace();
        if self.remaining().starts_with('!') && !self.remaining().starts_with("!=") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.consume("(") {
            let inner = self.parse_or()?;
            if !self.consume(")") {
                return Err(self.error(format!("expected ')', found '{}'", self.peek_word())));
            }
            return Ok(inner);
        }
        if self.consume("true") {
            return Ok(Expr::Literal(true));
        }
        if self.consume("false") {
            return Ok(Expr::Literal(false));
        }

        self.skip_whitespace();
        let word = self.peek_word();
        if let Some(flag) = Flag::from_name(&word) {
            self.pos += word.len();
            return Ok(Expr::Flag(flag));
        }

        let left = self.parse_operand()?;
        let op = self.parse_cmp()?;
        let right = self.parse_operand()?;
        Ok(Expr::Compare { left, op, right })
    }

    fn parse_cmp(&mut self) -> Result<CmpOp> {
        // Two-character operators first
        let ops = [
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
            ("=", CmpOp::Eq),
        ];
        for (token, op) in ops {
            if self.consume(token) {
                return Ok(op);
            }
        }
        Err(self.error(format!(
            "expected comparison operator, found '{}'",
            self.peek_word()
        )))
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '-' || c == '.' => {
                self.parse_number().map(Operand::Number)
            }
            Some(c) if c.is_alphabetic() => {
                let word = self.peek_word();
                match Field::from_name(&word) {
                    Some(field) => {
                        self.pos += word.len();
                        Ok(Operand::Field(field))
                    }
                    None => Err(self.error(format!("unknown field '{}'", word))),
                }
            }
            _ => Err(self.error(format!("expected value, found '{}'", self.peek_word()))),
        }
    }

    fn parse_number(&mut self) -> Result<Decimal> {
        let start = self.pos;
        let mut end = start;
        for (i, ch) in self.remaining().char_indices() {
            if ch.is_ascii_digit() || ch == '.' || (i == 0 && ch == '-') {
                end = start + i + ch.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.input[start..end];
        let value = Decimal::from_str(text).map_err(|_| RulebotError::InvalidPredicate {
            message: format!("invalid number '{}'", text),
            position: start,
        })?;
        self.pos = end;
        Ok(value)
    }
}

/// Compiled predicates per rule, recompiled when the source text changes
#[derive(Default)]
pub struct PredicateCache {
    compiled: DashMap<(RuleId, PredicateKind), (String, Arc<Expr>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateKind {
    Entry,
    Exit,
}

impl PredicateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rule_id: RuleId, kind: PredicateKind, source: &str) -> Result<Arc<Expr>> {
        if let Some(entry) = self.compiled.get(&(rule_id, kind)) {
            if entry.0 == source {
                return Ok(entry.1.clone());
            }
        }
        let expr = Arc::new(Expr::parse(source)?);
        self.compiled
            .insert((rule_id, kind), (source.to_string(), expr.clone()));
        Ok(expr)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn meta(price: Decimal) -> Metadata {
        Metadata {
            price,
            shares: 100,
            cash: dec!(5000),
            market_open: true,
            seconds_to_close: 3600,
            ..Metadata::default()
        }
    }

    #[test]
    fn parses_comparison() {
        let expr = Expr::parse("price < 150").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                left: Operand::Field(Field::Price),
                op: CmpOp::Lt,
                right: Operand::Number(dec!(150)),
            }
        );
        assert!(expr.evaluate(&meta(dec!(149.99))));
        assert!(!expr.evaluate(&meta(dec!(150))));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = Expr::parse("price > 200 or price < 100 and cash > 1000").unwrap();
        assert!(matches!(expr, Expr::Or(ref terms) if terms.len() == 2));
        assert!(expr.evaluate(&meta(dec!(90))));
        assert!(expr.evaluate(&meta(dec!(250))));
        assert!(!expr.evaluate(&meta(dec!(150))));
    }

    #[test]
    fn parentheses_and_negation() {
        let expr = Expr::parse("not (price >= 100 && market_open)").unwrap();
        assert!(expr.evaluate(&meta(dec!(99))));
        assert!(!expr.evaluate(&meta(dec!(101))));

        let expr = Expr::parse("!holding && price != 5").unwrap();
        assert!(expr.evaluate(&meta(dec!(6))));
    }

    #[test]
    fn missing_field_compares_false() {
        let expr = Expr::parse("buy_price > 0").unwrap();
        assert!(!expr.evaluate(&meta(dec!(10))));
        let expr = Expr::parse("not buy_price > 0").unwrap();
        assert!(expr.evaluate(&meta(dec!(10))));
    }

    #[test]
    fn reports_position_of_errors() {
        match Expr::parse("price < 10 and volume > 5") {
            Err(RulebotError::InvalidPredicate { message, position }) => {
                assert!(message.contains("volume"));
                assert_eq!(position, 15);
            }
            other => panic!("expected InvalidPredicate, got {:?}", other),
        }
        assert!(Expr::parse("price <").is_err());
        assert!(Expr::parse("(price < 1").is_err());
        assert!(Expr::parse("price < 1 garbage").is_err());
    }

    #[test]
    fn keywords_need_word_boundaries() {
        // `orders` must not be read as `or` + `ders`
        assert!(Expr::parse("price < 1 orders").is_err());
        assert!(Expr::parse("true").unwrap().evaluate(&Metadata::default()));
    }

    #[test]
    fn negative_and_fractional_numbers() {
        let expr = Expr::parse("gain_pct > -2.5").unwrap();
        let mut m = meta(dec!(10));
        m.gain_pct = Some(dec!(-1));
        assert!(expr.evaluate(&m));
    }

    #[test]
    fn cache_recompiles_on_source_change() {
        let cache = PredicateCache::new();
        let a = cache.get(1, PredicateKind::Entry, "price < 10").unwrap();
        let b = cache.get(1, PredicateKind::Entry, "price < 10").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = cache.get(1, PredicateKind::Entry, "price < 20").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 1);

        cache.get(1, PredicateKind::Exit, "price > 30").unwrap();
        assert_eq!(cache.len(), 2);
    }
}
