//! SQL parser: nom combinators over the supported statement surface.
//!
//! The grammar is closed: scripts are `CREATE TABLE` and `CREATE VIEW …
//! AS SELECT` statements, and anything outside the documented SELECT
//! surface fails with `UnsupportedSql` rather than parsing loosely.

use super::ast::*;
use crate::engine::types::ColumnType;
use crate::error::{Error, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt, peek, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use smol_str::SmolStr;

type PResult<'a, T> = IResult<&'a str, T>;

fn ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn fail<T>(input: &str) -> PResult<'_, T> {
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

/// A keyword: case-insensitive, not glued to a following identifier
/// character.
fn kw<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        let (rest, matched) = tag_no_case(word)(input)?;
        if rest.chars().next().map(ident_char).unwrap_or(false) {
            fail(input)
        } else {
            Ok((rest, matched))
        }
    }
}

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "HAVING", "ORDER", "LIMIT", "OFFSET", "JOIN",
    "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ASOF", "ON", "AND", "OR", "NOT", "NULL",
    "TRUE", "FALSE", "CASE", "WHEN", "THEN", "ELSE", "END", "CAST", "AS", "IN", "IS", "BETWEEN",
    "LIKE", "GLOB", "EXISTS", "UNION", "EXCEPT", "INTERSECT", "ALL", "DISTINCT", "CREATE",
    "TABLE", "VIEW", "PRIMARY", "KEY", "WITH", "OVER", "PARTITION", "ROWS", "PRECEDING",
    "CURRENT", "ROW", "ASC", "DESC",
];

fn bare_identifier(input: &str) -> PResult<'_, SmolStr> {
    let (rest, matched) = recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(ident_char),
    ))(input)?;
    if KEYWORDS.contains(&matched.to_ascii_uppercase().as_str()) {
        fail(input)
    } else {
        Ok((rest, SmolStr::new(matched)))
    }
}

fn quoted_identifier(input: &str) -> PResult<'_, SmolStr> {
    map(
        delimited(char('"'), take_while1(|c: char| c != '"'), char('"')),
        SmolStr::new,
    )(input)
}

fn identifier(input: &str) -> PResult<'_, SmolStr> {
    alt((quoted_identifier, bare_identifier))(input)
}

// --- literals ---

fn string_literal(input: &str) -> PResult<'_, String> {
    let mut chars = input.char_indices();
    match chars.next() {
        Some((_, '\'')) => {}
        _ => return fail(input),
    }
    let mut out = String::new();
    let mut rest_at = None;
    let bytes = input.as_bytes();
    let mut i = 1;
    while i < input.len() {
        if bytes[i] == b'\'' {
            if i + 1 < input.len() && bytes[i + 1] == b'\'' {
                out.push('\'');
                i += 2;
            } else {
                rest_at = Some(i + 1);
                break;
            }
        } else {
            let ch = input[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    match rest_at {
        Some(at) => Ok((&input[at..], out)),
        None => fail(input),
    }
}

fn number_literal(input: &str) -> PResult<'_, Literal> {
    let (rest, matched) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((
            alt((char('e'), char('E'))),
            opt(alt((char('+'), char('-')))),
            digit1,
        ))),
    )))(input)?;
    if matched.contains('.') || matched.contains('e') || matched.contains('E') {
        match matched.parse::<f64>() {
            Ok(f) => Ok((rest, Literal::Float(f))),
            Err(_) => fail(input),
        }
    } else {
        match matched.parse::<i64>() {
            Ok(i) => Ok((rest, Literal::Int(i))),
            Err(_) => matched
                .parse::<f64>()
                .map(|f| (rest, Literal::Float(f)))
                .map_err(|_| {
                    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
                }),
        }
    }
}

fn literal(input: &str) -> PResult<'_, Literal> {
    alt((
        value(Literal::Null, kw("NULL")),
        value(Literal::Bool(true), kw("TRUE")),
        value(Literal::Bool(false), kw("FALSE")),
        map(string_literal, Literal::Str),
        number_literal,
    ))(input)
}

// --- expressions, lowest to highest precedence ---

pub fn expr(input: &str) -> PResult<'_, Expr> {
    or_expr(input)
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut acc) = and_expr(input)?;
    loop {
        match preceded(ws(kw("OR")), and_expr)(input) {
            Ok((rest, rhs)) => {
                acc = Expr::Binary {
                    op: BinaryOperator::Or,
                    left: Box::new(acc),
                    right: Box::new(rhs),
                };
                input = rest;
            }
            Err(_) => return Ok((input, acc)),
        }
    }
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut acc) = not_expr(input)?;
    loop {
        match preceded(ws(kw("AND")), not_expr)(input) {
            Ok((rest, rhs)) => {
                acc = Expr::Binary {
                    op: BinaryOperator::And,
                    left: Box::new(acc),
                    right: Box::new(rhs),
                };
                input = rest;
            }
            Err(_) => return Ok((input, acc)),
        }
    }
}

fn not_expr(input: &str) -> PResult<'_, Expr> {
    match preceded(ws(kw("NOT")), not_expr)(input) {
        Ok((rest, inner)) => {
            // NOT EXISTS / NOT (x IN ...) normalize onto the node itself.
            let negated = match inner {
                Expr::Exists { query, negated } => Expr::Exists {
                    query,
                    negated: !negated,
                },
                Expr::InSubquery {
                    expr,
                    query,
                    negated,
                } => Expr::InSubquery {
                    expr,
                    query,
                    negated: !negated,
                },
                other => Expr::Unary {
                    op: UnaryOperator::Not,
                    expr: Box::new(other),
                },
            };
            Ok((rest, negated))
        }
        Err(_) => comparison(input),
    }
}

enum InBody {
    List(Vec<Expr>),
    Subquery(Box<Query>),
}

fn in_body(input: &str) -> PResult<'_, InBody> {
    delimited(
        ws(char('(')),
        alt((
            map(query, |q| InBody::Subquery(Box::new(q))),
            map(separated_list1(ws(char(',')), expr), InBody::List),
        )),
        ws(char(')')),
    )(input)
}

fn comparison(input: &str) -> PResult<'_, Expr> {
    let (input, lhs) = additive(input)?;

    // IS [NOT] NULL
    if let Ok((rest, negated)) = preceded(
        ws(kw("IS")),
        map(opt(ws(kw("NOT"))), |n| n.is_some()),
    )(input)
    {
        let (rest, _) = ws(kw("NULL"))(rest)?;
        return Ok((
            rest,
            Expr::IsNull {
                expr: Box::new(lhs),
                negated,
            },
        ));
    }

    // [NOT] BETWEEN a AND b / IN (...) / LIKE p / GLOB p
    let (after_not, negated) = match ws(kw("NOT"))(input) {
        Ok((rest, _)) => (rest, true),
        Err(_) => (input, false),
    };

    if let Ok((rest, _)) = ws(kw("BETWEEN"))(after_not) {
        let (rest, low) = additive(rest)?;
        let (rest, _) = ws(kw("AND"))(rest)?;
        let (rest, high) = additive(rest)?;
        return Ok((
            rest,
            Expr::Between {
                expr: Box::new(lhs),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            },
        ));
    }
    if let Ok((rest, _)) = ws(kw("IN"))(after_not) {
        let (rest, body) = in_body(rest)?;
        let node = match body {
            InBody::List(list) => Expr::InList {
                expr: Box::new(lhs),
                list,
                negated,
            },
            InBody::Subquery(query) => Expr::InSubquery {
                expr: Box::new(lhs),
                query,
                negated,
            },
        };
        return Ok((rest, node));
    }
    if let Ok((rest, _)) = ws(kw("LIKE"))(after_not) {
        let (rest, pattern) = additive(rest)?;
        return Ok((
            rest,
            Expr::Like {
                expr: Box::new(lhs),
                pattern: Box::new(pattern),
                negated,
                glob: false,
            },
        ));
    }
    if let Ok((rest, _)) = ws(kw("GLOB"))(after_not) {
        let (rest, pattern) = additive(rest)?;
        return Ok((
            rest,
            Expr::Like {
                expr: Box::new(lhs),
                pattern: Box::new(pattern),
                negated,
                glob: true,
            },
        ));
    }
    if negated {
        // A bare NOT here belongs to not_expr, not to us.
        return fail(input);
    }

    let op_parser = ws(alt((
        value(BinaryOperator::NotEq, tag("!=")),
        value(BinaryOperator::NotEq, tag("<>")),
        value(BinaryOperator::LtEq, tag("<=")),
        value(BinaryOperator::GtEq, tag(">=")),
        value(BinaryOperator::Eq, tag("=")),
        value(BinaryOperator::Lt, tag("<")),
        value(BinaryOperator::Gt, tag(">")),
    )));
    match pair(op_parser, additive)(input) {
        Ok((rest, (op, rhs))) => Ok((
            rest,
            Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            },
        )),
        Err(_) => Ok((input, lhs)),
    }
}

fn additive(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut acc) = multiplicative(input)?;
    loop {
        let op = alt((
            value(BinaryOperator::Plus, char('+')),
            value(BinaryOperator::Minus, char('-')),
        ));
        match pair(ws(op), multiplicative)(input) {
            Ok((rest, (op, rhs))) => {
                acc = Expr::Binary {
                    op,
                    left: Box::new(acc),
                    right: Box::new(rhs),
                };
                input = rest;
            }
            Err(_) => return Ok((input, acc)),
        }
    }
}

fn multiplicative(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut acc) = unary(input)?;
    loop {
        let op = alt((
            value(BinaryOperator::Multiply, char('*')),
            value(BinaryOperator::Divide, char('/')),
        ));
        match pair(ws(op), unary)(input) {
            Ok((rest, (op, rhs))) => {
                acc = Expr::Binary {
                    op,
                    left: Box::new(acc),
                    right: Box::new(rhs),
                };
                input = rest;
            }
            Err(_) => return Ok((input, acc)),
        }
    }
}

fn unary(input: &str) -> PResult<'_, Expr> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('-')(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((
            rest,
            Expr::Unary {
                op: UnaryOperator::Minus,
                expr: Box::new(inner),
            },
        ));
    }
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('+')(input) {
        let (rest, inner) = unary(rest)?;
        return Ok((
            rest,
            Expr::Unary {
                op: UnaryOperator::Plus,
                expr: Box::new(inner),
            },
        ));
    }
    primary(input)
}

fn case_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = kw("CASE")(input)?;
    let (input, operand) = opt(preceded(
        peek(ws(nom::combinator::not(kw("WHEN")))),
        ws(expr),
    ))(input)
    .map(|(rest, op)| (rest, op))?;
    let (input, branches) = nom::multi::many1(tuple((
        preceded(ws(kw("WHEN")), expr),
        preceded(ws(kw("THEN")), expr),
    )))(input)?;
    let (input, otherwise) = opt(preceded(ws(kw("ELSE")), expr))(input)?;
    let (input, _) = ws(kw("END"))(input)?;
    Ok((
        input,
        Expr::Case {
            operand: operand.map(Box::new),
            branches,
            otherwise: otherwise.map(Box::new),
        },
    ))
}

fn type_name(input: &str) -> PResult<'_, ColumnType> {
    let (rest, word) = ws(take_while1(|c: char| c.is_alphabetic()))(input)?;
    // Optional precision arguments, accepted and ignored: DECIMAL(10, 2)
    let (rest, _) = opt(delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), digit1),
        ws(char(')')),
    ))(rest)?;
    match ColumnType::parse(word) {
        Some(ty) => Ok((rest, ty)),
        None => fail(input),
    }
}

fn cast_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = kw("CAST")(input)?;
    let (input, (inner, ty)) = delimited(
        ws(char('(')),
        pair(expr, preceded(ws(kw("AS")), type_name)),
        ws(char(')')),
    )(input)?;
    Ok((
        input,
        Expr::Cast {
            expr: Box::new(inner),
            ty,
        },
    ))
}

fn exists_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = kw("EXISTS")(input)?;
    let (input, q) = delimited(ws(char('(')), query, ws(char(')')))(input)?;
    Ok((
        input,
        Expr::Exists {
            query: Box::new(q),
            negated: false,
        },
    ))
}

fn order_item(input: &str) -> PResult<'_, OrderItem> {
    let (input, e) = expr(input)?;
    let (input, dir) = opt(ws(alt((kw("ASC"), kw("DESC")))))(input)?;
    Ok((
        input,
        OrderItem {
            expr: e,
            desc: dir.map(|d| d.eq_ignore_ascii_case("DESC")).unwrap_or(false),
        },
    ))
}

fn window_frame(input: &str) -> PResult<'_, WindowFrame> {
    let (input, _) = ws(kw("ROWS"))(input)?;
    let (input, _) = ws(kw("BETWEEN"))(input)?;
    let (input, n) = ws(digit1)(input)?;
    let (input, _) = ws(kw("PRECEDING"))(input)?;
    let (input, _) = ws(kw("AND"))(input)?;
    let (input, _) = ws(kw("CURRENT"))(input)?;
    let (input, _) = ws(kw("ROW"))(input)?;
    let preceding = n.parse::<u64>().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    Ok((input, WindowFrame { preceding }))
}

fn over_clause(input: &str) -> PResult<'_, OverClause> {
    let (input, _) = ws(kw("OVER"))(input)?;
    let (input, _) = ws(char('('))(input)?;
    let (input, partition_by) = opt(preceded(
        pair(ws(kw("PARTITION")), ws(kw("BY"))),
        separated_list1(ws(char(',')), expr),
    ))(input)?;
    let (input, order_by) = opt(preceded(
        pair(ws(kw("ORDER")), ws(kw("BY"))),
        order_item,
    ))(input)?;
    let (input, frame) = opt(window_frame)(input)?;
    let (input, _) = ws(char(')'))(input)?;
    Ok((
        input,
        OverClause {
            partition_by: partition_by.unwrap_or_default(),
            order_by,
            frame,
        },
    ))
}

fn function_call(input: &str) -> PResult<'_, Expr> {
    let (input, name) = identifier(input)?;
    let (input, _) = char('(')(input)?;
    let (input, distinct) = map(opt(ws(kw("DISTINCT"))), |d| d.is_some())(input)?;
    let (input, star) = map(opt(ws(char('*'))), |s| s.is_some())(input)?;
    let (input, args) = if star {
        (input, Vec::new())
    } else {
        match separated_list1(ws(char(',')), expr)(input) {
            Ok((rest, args)) => (rest, args),
            Err(_) => (input, Vec::new()),
        }
    };
    let (input, _) = ws(char(')'))(input)?;
    let (input, over) = opt(over_clause)(input)?;
    Ok((
        input,
        Expr::Function {
            name,
            args,
            distinct,
            star,
            over: over.map(Box::new),
        },
    ))
}

fn qualified_ident(input: &str) -> PResult<'_, Expr> {
    let (input, first) = identifier(input)?;
    match preceded(char('.'), identifier)(input) {
        Ok((rest, second)) => Ok((
            rest,
            Expr::Ident {
                qualifier: Some(first),
                name: second,
            },
        )),
        Err(_) => Ok((
            input,
            Expr::Ident {
                qualifier: None,
                name: first,
            },
        )),
    }
}

fn primary(input: &str) -> PResult<'_, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        case_expr,
        cast_expr,
        exists_expr,
        map(literal, Expr::Literal),
        function_call,
        qualified_ident,
        delimited(ws(char('(')), expr, ws(char(')'))),
    ))(input)
}

// --- SELECT / query ---

fn select_item(input: &str) -> PResult<'_, SelectItem> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('*')(input) {
        return Ok((rest, SelectItem::Wildcard));
    }
    if let Ok((rest, q)) =
        terminated(identifier, pair(char('.'), char('*')))(input)
    {
        return Ok((rest, SelectItem::QualifiedWildcard(q)));
    }
    let (input, e) = expr(input)?;
    let (input, alias) = opt(preceded(opt(ws(kw("AS"))), ws(identifier)))(input)?;
    Ok((input, SelectItem::Expr { expr: e, alias }))
}

fn table_ref(input: &str) -> PResult<'_, TableRef> {
    let (input, name) = ws(identifier)(input)?;
    let (input, alias) = opt(preceded(opt(ws(kw("AS"))), ws(identifier)))(input)?;
    Ok((input, TableRef { name, alias }))
}

fn join_clause(input: &str) -> PResult<'_, Join> {
    let (input, _) = multispace0(input)?;
    let (input, kind) = alt((
        value(JoinKind::Cross, pair(kw("CROSS"), ws(kw("JOIN")))),
        value(JoinKind::Asof, pair(kw("ASOF"), ws(kw("JOIN")))),
        value(
            JoinKind::Left,
            tuple((kw("LEFT"), opt(ws(kw("OUTER"))), ws(kw("JOIN")))),
        ),
        value(
            JoinKind::Right,
            tuple((kw("RIGHT"), opt(ws(kw("OUTER"))), ws(kw("JOIN")))),
        ),
        value(
            JoinKind::Full,
            tuple((kw("FULL"), opt(ws(kw("OUTER"))), ws(kw("JOIN")))),
        ),
        value(JoinKind::Inner, pair(kw("INNER"), ws(kw("JOIN")))),
        value(JoinKind::Inner, kw("JOIN")),
    ))(input)?;
    let (input, table) = table_ref(input)?;
    let (input, on) = if kind == JoinKind::Cross {
        (input, None)
    } else {
        let (rest, on) = preceded(ws(kw("ON")), expr)(input)?;
        (rest, Some(on))
    };
    Ok((input, Join { kind, table, on }))
}

fn select_core(input: &str) -> PResult<'_, Select> {
    let (input, _) = ws(kw("SELECT"))(input)?;
    let (input, distinct) = map(opt(ws(kw("DISTINCT"))), |d| d.is_some())(input)?;
    let (input, items) = separated_list1(ws(char(',')), select_item)(input)?;
    let (input, from) = opt(preceded(
        ws(kw("FROM")),
        map(pair(table_ref, many0(join_clause)), |(base, joins)| {
            FromClause { base, joins }
        }),
    ))(input)?;
    let (input, where_clause) = opt(preceded(ws(kw("WHERE")), expr))(input)?;
    let (input, group_by) = opt(preceded(
        pair(ws(kw("GROUP")), ws(kw("BY"))),
        separated_list1(ws(char(',')), expr),
    ))(input)?;
    let (input, having) = opt(preceded(ws(kw("HAVING")), expr))(input)?;
    Ok((
        input,
        Select {
            distinct,
            items,
            from,
            where_clause,
            group_by: group_by.unwrap_or_default(),
            having,
        },
    ))
}

fn query_body(input: &str) -> PResult<'_, QueryBody> {
    let (mut input, first) = select_core(input)?;
    let mut acc = QueryBody::Select(Box::new(first));
    loop {
        let op_parser = ws(alt((
            value(SetOperator::Union, kw("UNION")),
            value(SetOperator::Except, kw("EXCEPT")),
            value(SetOperator::Intersect, kw("INTERSECT")),
        )));
        match pair(op_parser, map(opt(ws(kw("ALL"))), |a| a.is_some()))(input) {
            Ok((rest, (op, all))) => {
                let (rest, next) = select_core(rest)?;
                acc = QueryBody::SetOp {
                    op,
                    all,
                    left: Box::new(acc),
                    right: Box::new(QueryBody::Select(Box::new(next))),
                };
                input = rest;
            }
            Err(_) => return Ok((input, acc)),
        }
    }
}

pub fn query(input: &str) -> PResult<'_, Query> {
    let (input, body) = query_body(input)?;
    let (input, order_by) = opt(preceded(
        pair(ws(kw("ORDER")), ws(kw("BY"))),
        separated_list1(ws(char(',')), order_item),
    ))(input)?;
    let (input, limit) = opt(preceded(ws(kw("LIMIT")), ws(digit1)))(input)?;
    let (input, offset) = if limit.is_some() {
        opt(preceded(ws(kw("OFFSET")), ws(digit1)))(input)?
    } else {
        (input, None)
    };
    let parse_u64 = |s: Option<&str>| s.map(|d| d.parse::<u64>().unwrap_or(u64::MAX));
    Ok((
        input,
        Query {
            body,
            order_by: order_by.unwrap_or_default(),
            limit: parse_u64(limit),
            offset: parse_u64(offset),
        },
    ))
}

// --- statements ---

fn option_value(input: &str) -> PResult<'_, OptionValue> {
    alt((
        map(string_literal, OptionValue::Text),
        map(recognize(pair(opt(char('-')), digit1)), |d: &str| {
            OptionValue::Number(d.parse().unwrap_or(0))
        }),
        // bare words may contain '-' (append-only)
        map(
            take_while1(|c: char| ident_char(c) || c == '-'),
            |s: &str| OptionValue::Ident(SmolStr::new(s)),
        ),
    ))(input)
}

fn with_options(input: &str) -> PResult<'_, Vec<(SmolStr, OptionValue)>> {
    preceded(
        ws(kw("WITH")),
        delimited(
            ws(char('(')),
            separated_list1(
                ws(char(',')),
                pair(ws(identifier), preceded(ws(char('=')), ws(option_value))),
            ),
            ws(char(')')),
        ),
    )(input)
}

enum TableItem {
    Column(ColumnSpec),
    PrimaryKey(Vec<SmolStr>),
}

fn table_item(input: &str) -> PResult<'_, TableItem> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, _)) = pair(kw("PRIMARY"), ws(kw("KEY")))(input) {
        let (rest, cols) = delimited(
            ws(char('(')),
            separated_list1(ws(char(',')), ws(identifier)),
            ws(char(')')),
        )(rest)?;
        return Ok((rest, TableItem::PrimaryKey(cols)));
    }
    let (input, name) = identifier(input)?;
    let (input, ty) = type_name(input)?;
    let (input, pk) = map(opt(pair(ws(kw("PRIMARY")), ws(kw("KEY")))), |p| {
        p.is_some()
    })(input)?;
    Ok((
        input,
        TableItem::Column(ColumnSpec {
            name,
            ty,
            primary_key: pk,
        }),
    ))
}

fn create_table(input: &str) -> PResult<'_, Statement> {
    let (input, _) = tuple((ws(kw("CREATE")), ws(kw("TABLE"))))(input)?;
    let (input, name) = ws(identifier)(input)?;
    let (input, items) = delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), table_item),
        ws(char(')')),
    )(input)?;
    let (input, options) = opt(with_options)(input)?;

    let mut columns = Vec::new();
    let mut primary_key = Vec::new();
    for item in items {
        match item {
            TableItem::Column(col) => columns.push(col),
            TableItem::PrimaryKey(cols) => primary_key = cols,
        }
    }
    Ok((
        input,
        Statement::CreateTable(CreateTable {
            name,
            columns,
            primary_key,
            options: options.unwrap_or_default(),
        }),
    ))
}

fn create_view(input: &str) -> PResult<'_, Statement> {
    let (input, _) = tuple((ws(kw("CREATE")), ws(kw("VIEW"))))(input)?;
    let (input, name) = ws(identifier)(input)?;
    let (input, options) = opt(with_options)(input)?;
    let (input, _) = ws(kw("AS"))(input)?;
    let (input, q) = query(input)?;
    Ok((
        input,
        Statement::CreateView(CreateView {
            name,
            options: options.unwrap_or_default(),
            query: q,
        }),
    ))
}

fn statement(input: &str) -> PResult<'_, Statement> {
    alt((create_table, create_view))(input)
}

/// Parse a full script. Every statement must be recognized and all
/// input consumed; anything else is `UnsupportedSql`.
pub fn parse_script(input: &str) -> Result<Vec<Statement>> {
    let mut rest = input;
    let mut statements = Vec::new();
    loop {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return Ok(statements);
        }
        match statement(trimmed) {
            Ok((after, stmt)) => {
                statements.push(stmt);
                let after = after.trim_start();
                rest = after.strip_prefix(';').unwrap_or(after);
            }
            Err(_) => {
                let snippet: String = trimmed.chars().take(60).collect();
                return Err(Error::unsupported(format!(
                    "could not parse statement near: {}",
                    snippet
                )));
            }
        }
    }
}

/// Parse one SELECT query (used by tests and the planner's subqueries).
pub fn parse_query(input: &str) -> Result<Query> {
    match query(input) {
        Ok((rest, q)) if rest.trim().trim_end_matches(';').is_empty() => Ok(q),
        Ok((rest, _)) => Err(Error::unsupported(format!(
            "trailing input after query: {}",
            rest.trim()
        ))),
        Err(_) => Err(Error::unsupported(format!("could not parse query: {}", input))),
    }
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    fn parse_one(sql: &str) -> Statement {
        let mut stmts = parse_script(sql).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.remove(0)
    }

    #[test]
    fn create_table_with_pk_marker() {
        let stmt = parse_one("CREATE TABLE orders (id INT PRIMARY KEY, status TEXT);");
        match stmt {
            Statement::CreateTable(t) => {
                assert_eq!(t.name, "orders");
                assert_eq!(t.columns.len(), 2);
                assert!(t.columns[0].primary_key);
                assert_eq!(t.columns[1].ty, ColumnType::Text);
            }
            _ => panic!("expected CREATE TABLE"),
        }
    }

    #[test]
    fn create_table_with_composite_key_and_options() {
        let stmt = parse_one(
            "CREATE TABLE t (a INT, b TEXT, PRIMARY KEY (a, b)) WITH (max_rows = 100)",
        );
        match stmt {
            Statement::CreateTable(t) => {
                assert_eq!(t.primary_key, vec!["a", "b"]);
                assert_eq!(t.options[0].1, OptionValue::Number(100));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn select_with_everything() {
        let stmt = parse_one(
            "CREATE VIEW v AS \
             SELECT o.id, UPPER(c.name) AS cname, o.amount * 2 \
             FROM orders o JOIN customers AS c ON o.cid = c.id \
             WHERE o.amount > 10 AND c.name LIKE 'A%' \
             GROUP BY o.id, cname HAVING COUNT(*) > 1 \
             ORDER BY o.id DESC LIMIT 10 OFFSET 2",
        );
        match stmt {
            Statement::CreateView(v) => {
                let q = v.query;
                assert_eq!(q.limit, Some(10));
                assert_eq!(q.offset, Some(2));
                assert_eq!(q.order_by.len(), 1);
                assert!(q.order_by[0].desc);
                match q.body {
                    QueryBody::Select(s) => {
                        assert_eq!(s.items.len(), 3);
                        let from = s.from.unwrap();
                        assert_eq!(from.joins.len(), 1);
                        assert_eq!(from.joins[0].kind, JoinKind::Inner);
                        assert!(s.having.is_some());
                        assert_eq!(s.group_by.len(), 2);
                    }
                    _ => panic!(),
                }
            }
            _ => panic!(),
        }
    }

    #[test]
    fn window_function_clause() {
        let stmt = parse_one(
            "CREATE VIEW w AS SELECT ts, SUM(v) OVER (PARTITION BY k ORDER BY ts \
             ROWS BETWEEN 2 PRECEDING AND CURRENT ROW) FROM p",
        );
        match stmt {
            Statement::CreateView(v) => match v.query.body {
                QueryBody::Select(s) => match &s.items[1] {
                    SelectItem::Expr {
                        expr: Expr::Function { name, over, .. },
                        ..
                    } => {
                        assert_eq!(name.as_str().to_uppercase(), "SUM");
                        let over = over.as_ref().unwrap();
                        assert_eq!(over.partition_by.len(), 1);
                        assert_eq!(over.frame.unwrap().preceding, 2);
                    }
                    other => panic!("unexpected item {:?}", other),
                },
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn set_operations_chain() {
        let stmt = parse_one("CREATE VIEW s AS SELECT a FROM t UNION ALL SELECT a FROM u");
        match stmt {
            Statement::CreateView(v) => match v.query.body {
                QueryBody::SetOp { op, all, .. } => {
                    assert_eq!(op, SetOperator::Union);
                    assert!(all);
                }
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn exists_and_in_subquery() {
        let stmt = parse_one(
            "CREATE VIEW o AS SELECT * FROM orders \
             WHERE customer_id NOT IN (SELECT id FROM customers)",
        );
        match stmt {
            Statement::CreateView(v) => match v.query.body {
                QueryBody::Select(s) => match s.where_clause.unwrap() {
                    Expr::InSubquery { negated, .. } => assert!(negated),
                    other => panic!("unexpected {:?}", other),
                },
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn case_cast_and_strings() {
        let stmt = parse_one(
            "CREATE VIEW x AS SELECT CASE WHEN a > 1 THEN 'big' ELSE 'small' END, \
             CAST(a AS TEXT), PRINTF('%d', a), 'it''s' FROM t",
        );
        match stmt {
            Statement::CreateView(v) => match v.query.body {
                QueryBody::Select(s) => {
                    assert_eq!(s.items.len(), 4);
                    match &s.items[3] {
                        SelectItem::Expr {
                            expr: Expr::Literal(Literal::Str(text)),
                            ..
                        } => assert_eq!(text, "it's"),
                        other => panic!("unexpected {:?}", other),
                    }
                }
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn asof_join_spelling() {
        let stmt = parse_one(
            "CREATE VIEW a AS SELECT * FROM trades t ASOF JOIN prices p \
             ON t.symbol = p.symbol AND t.ts >= p.ts",
        );
        match stmt {
            Statement::CreateView(v) => match v.query.body {
                QueryBody::Select(s) => {
                    assert_eq!(s.from.unwrap().joins[0].kind, JoinKind::Asof);
                }
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn rejects_unsupported_statements() {
        assert!(parse_script("DROP TABLE t").is_err());
        assert!(parse_script("CREATE TABLE t (a BLOB)").is_err());
        assert!(parse_script("SELECT 1").is_err());
        assert!(parse_script("CREATE VIEW v AS SELECT a FROM t WINDOW w AS (ORDER BY a)").is_err());
    }

    #[test]
    fn precedence_binds_as_expected() {
        // a + b * c parses as a + (b * c)
        let (_, e) = expr("a + b * c").unwrap();
        match e {
            Expr::Binary {
                op: BinaryOperator::Plus,
                right,
                ..
            } => match *right {
                Expr::Binary {
                    op: BinaryOperator::Multiply,
                    ..
                } => {}
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        // NOT a = 1 OR b = 2 parses as (NOT (a = 1)) OR (b = 2)
        let (_, e) = expr("NOT a = 1 OR b = 2").unwrap();
        match e {
            Expr::Binary {
                op: BinaryOperator::Or,
                left,
                ..
            } => match *left {
                Expr::Unary {
                    op: UnaryOperator::Not,
                    ..
                } => {}
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
