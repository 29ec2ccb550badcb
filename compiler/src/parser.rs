// Parser for straight-line expression source files.
//
// Parses a token stream (from the lexer) into an AST: newline-separated
// scalar assignments with conventional arithmetic precedence. Uses chumsky
// combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines (statement separators) ──

    let nl = just(Token::Newline).repeated().at_least(1).ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Array index: an unsigned integer literal ──

    let index = select! {
        Token::Number(n) if n.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&n) => n as u32,
    };

    // ── Expression ──

    let expr = recursive(|expr| {
        let number = select! {
            Token::Number(n) = e => Expr::Number(n, e.span()),
        };

        let call = ident
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(name, args), e| Expr::Call(name, args, e.span()));

        let element = ident
            .clone()
            .then(
                index
                    .clone()
                    .delimited_by(just(Token::LBracket), just(Token::RBracket)),
            )
            .map_with(|(name, idx), e| Expr::Element(name, idx, e.span()));

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let primary = call
            .or(element)
            .or(ident.clone().map(Expr::Scalar))
            .or(number)
            .or(paren);

        let factor = recursive(|factor| {
            just(Token::Minus)
                .ignore_then(factor)
                .map_with(|inner, e| Expr::Neg(Box::new(inner), e.span()))
                .or(primary)
        });

        let term = factor.clone().foldl_with(
            just(Token::Star)
                .to(BinOp::Mul)
                .or(just(Token::Slash).to(BinOp::Div))
                .then(factor)
                .repeated(),
            |lhs, (op, rhs), e| Expr::Binary(op, Box::new(lhs), Box::new(rhs), e.span()),
        );

        term.clone().foldl_with(
            just(Token::Plus)
                .to(BinOp::Add)
                .or(just(Token::Minus).to(BinOp::Sub))
                .then(term)
                .repeated(),
            |lhs, (op, rhs), e| Expr::Binary(op, Box::new(lhs), Box::new(rhs), e.span()),
        )
    });

    // ── Statement: target '=' expr ──

    let target = ident
        .clone()
        .then(
            index
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .or_not(),
        )
        .map_with(|(name, idx), e| match idx {
            Some(idx) => Target::Element(name, idx, e.span()),
            None => Target::Scalar(name),
        });

    let statement = target
        .then_ignore(just(Token::Equals))
        .then(expr)
        .map_with(|(target, expr), e| Statement {
            target,
            expr,
            span: e.span(),
        });

    // ── Program ──

    statement
        .separated_by(nl)
        .allow_leading()
        .allow_trailing()
        .collect::<Vec<_>>()
        .map(|statements| Program { statements })
        .then_ignore(end())
}

// ── Tests ───────────────────────────────────────────────────────────────────
