// tests/lexer_tests.rs

use expr_engine::ast::TokenKind;
use expr_engine::lexer::{LexError, Lexer};

fn kinds(input: &str) -> Vec<TokenKind> {
    Lexer::new(input)
        .tokenize()
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

fn single(input: &str) -> TokenKind {
    let mut lexer = Lexer::new(input);
    let token = lexer.next_token().unwrap();
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof, "trailing input in {}", input);
    token.kind
}

// ============================================================================
// Single Character Tokens
// ============================================================================

#[test]
fn test_single_char_tokens() {
    let test_cases = vec![
        ("+", TokenKind::Plus),
        ("-", TokenKind::Minus),
        ("*", TokenKind::Star),
        ("/", TokenKind::Slash),
        ("%", TokenKind::Percent),
        ("^", TokenKind::Caret),
        ("<", TokenKind::Lt),
        (">", TokenKind::Gt),
        ("=", TokenKind::Assign),
        ("!", TokenKind::Not),
        ("?", TokenKind::Question),
        ("(", TokenKind::LParen),
        (")", TokenKind::RParen),
        (",", TokenKind::Comma),
        (":", TokenKind::Colon),
        (";", TokenKind::Semicolon),
    ];

    for (input, expected) in test_cases {
        assert_eq!(single(input), expected, "Failed for input: {}", input);
    }
}

// ============================================================================
// Two Character Tokens
// ============================================================================

#[test]
fn test_two_char_tokens() {
    let test_cases = vec![
        ("==", TokenKind::EqEq),
        ("!=", TokenKind::NotEq),
        ("<=", TokenKind::LtEq),
        (">=", TokenKind::GtEq),
        ("&&", TokenKind::And),
        ("||", TokenKind::Or),
    ];

    for (input, expected) in test_cases {
        assert_eq!(single(input), expected, "Failed for input: {}", input);
    }
}

#[test]
fn test_two_char_vs_single_char() {
    assert_eq!(
        kinds("< ="),
        vec![TokenKind::Lt, TokenKind::Assign, TokenKind::Eof]
    );
    assert_eq!(kinds("<="), vec![TokenKind::LtEq, TokenKind::Eof]);
    assert_eq!(
        kinds("!!x"),
        vec![
            TokenKind::Not,
            TokenKind::Not,
            TokenKind::Identifier("x".into()),
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_single_ampersand_and_pipe_are_invalid() {
    for input in ["a & b", "a | b"] {
        let err = Lexer::new(input).tokenize().unwrap_err();
        assert!(
            matches!(err, LexError::UnexpectedCharacter { position: 2, .. }),
            "Failed for input: {}",
            input
        );
    }
}

// ============================================================================
// Keywords
// ============================================================================

#[test]
fn test_keywords() {
    let test_cases = vec![
        ("let", TokenKind::Let),
        ("as", TokenKind::As),
        ("if", TokenKind::If),
        ("elif", TokenKind::Elif),
        ("else", TokenKind::Else),
        ("and", TokenKind::And),
        ("or", TokenKind::Or),
        ("not", TokenKind::Not),
        ("Out", TokenKind::Out),
        ("true", TokenKind::Boolean(true)),
        ("false", TokenKind::Boolean(false)),
        ("null", TokenKind::Null),
    ];

    for (input, expected) in test_cases {
        assert_eq!(single(input), expected, "Failed for input: {}", input);
    }
}

#[test]
fn test_keywords_vs_identifiers() {
    let test_cases = vec![
        "android", "letter", "ifdef", "elsewhere", "order", "truth", "nullable", "out", "OUT",
        "Let", "notify",
    ];

    for input in test_cases {
        assert_eq!(
            single(input),
            TokenKind::Identifier(input.to_string()),
            "Failed for input: {}",
            input
        );
    }
}

// ============================================================================
// Identifiers
// ============================================================================

#[test]
fn test_identifiers() {
    let test_cases = vec!["x", "snake_case", "camelCase", "_private", "a1b2c3"];

    for input in test_cases {
        assert_eq!(single(input), TokenKind::Identifier(input.to_string()));
    }
}

#[test]
fn test_dotted_identifier_is_one_token() {
    assert_eq!(
        single("player.stats.health"),
        TokenKind::Identifier("player.stats.health".into())
    );
    assert_eq!(single("items.0"), TokenKind::Identifier("items.0".into()));
}

#[test]
fn test_trailing_dot_is_not_part_of_identifier() {
    let err = Lexer::new("player.").tokenize().unwrap_err();
    assert!(matches!(err, LexError::UnexpectedCharacter { ch: '.', position: 6 }));
}

// ============================================================================
// Numbers
// ============================================================================

#[test]
fn test_integers() {
    let test_cases = vec![("0", 0), ("1", 1), ("42", 42), ("123456", 123456)];

    for (input, expected) in test_cases {
        assert_eq!(single(input), TokenKind::Integer(expected), "Failed for input: {}", input);
    }
}

#[test]
fn test_floats() {
    let test_cases = vec![("0.5", 0.5), ("3.14", 3.14), ("10.0", 10.0)];

    for (input, expected) in test_cases {
        assert_eq!(single(input), TokenKind::Float(expected), "Failed for input: {}", input);
    }
}

#[test]
fn test_number_then_dot_without_digit() {
    // "1." is an integer followed by a stray dot
    let err = Lexer::new("1.").tokenize().unwrap_err();
    assert!(matches!(err, LexError::UnexpectedCharacter { ch: '.', .. }));
}

#[test]
fn test_integer_overflow_is_an_error() {
    let err = Lexer::new("99999999999999999999").tokenize().unwrap_err();
    assert!(matches!(err, LexError::InvalidNumber { position: 0, .. }));
}

#[test]
fn test_negative_number_is_two_tokens() {
    assert_eq!(
        kinds("-5"),
        vec![TokenKind::Minus, TokenKind::Integer(5), TokenKind::Eof]
    );
}

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_double_and_single_quoted_strings() {
    assert_eq!(single("\"hello\""), TokenKind::String("hello".into()));
    assert_eq!(single("'hello'"), TokenKind::String("hello".into()));
    assert_eq!(single("'say \"hi\"'"), TokenKind::String("say \"hi\"".into()));
}

#[test]
fn test_escape_sequences() {
    let test_cases = vec![
        (r#""a\nb""#, "a\nb"),
        (r#""a\tb""#, "a\tb"),
        (r#""a\rb""#, "a\rb"),
        (r#""a\"b""#, "a\"b"),
        (r#"'it\'s'"#, "it's"),
        (r#""a\\b""#, "a\\b"),
        // unknown escapes keep the escaped character
        (r#""a\qb""#, "aqb"),
    ];

    for (input, expected) in test_cases {
        assert_eq!(single(input), TokenKind::String(expected.into()), "Failed for input: {}", input);
    }
}

#[test]
fn test_unterminated_string() {
    let err = Lexer::new("x + \"open").tokenize().unwrap_err();
    assert_eq!(err, LexError::UnterminatedString(4));

    let err = Lexer::new("'trailing\\").tokenize().unwrap_err();
    assert_eq!(err, LexError::UnterminatedString(0));
}

// ============================================================================
// Positions and lexemes
// ============================================================================

#[test]
fn test_positions_and_lexemes() {
    let tokens = Lexer::new("let  x = 'a b';").tokenize().unwrap();
    let summary: Vec<(usize, &str)> = tokens.iter().map(|t| (t.position, t.lexeme.as_str())).collect();
    assert_eq!(
        summary,
        vec![(0, "let"), (5, "x"), (7, "="), (9, "'a b'"), (14, ";"), (15, "")]
    );
}

#[test]
fn test_whitespace_and_newlines_are_skipped() {
    assert_eq!(
        kinds("  1\n+\t2  "),
        vec![
            TokenKind::Integer(1),
            TokenKind::Plus,
            TokenKind::Integer(2),
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_empty_input_is_just_eof() {
    assert_eq!(kinds(""), vec![TokenKind::Eof]);
    assert_eq!(kinds("   "), vec![TokenKind::Eof]);
}

// ============================================================================
// Full expressions
// ============================================================================

#[test]
fn test_generic_call_tokens() {
    assert_eq!(
        kinds("Out<int>(f<Material>(x))"),
        vec![
            TokenKind::Out,
            TokenKind::Lt,
            TokenKind::Identifier("int".into()),
            TokenKind::Gt,
            TokenKind::LParen,
            TokenKind::Identifier("f".into()),
            TokenKind::Lt,
            TokenKind::Identifier("Material".into()),
            TokenKind::Gt,
            TokenKind::LParen,
            TokenKind::Identifier("x".into()),
            TokenKind::RParen,
            TokenKind::RParen,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_let_with_uses() {
    assert_eq!(
        kinds("let y = 10 as -1; y"),
        vec![
            TokenKind::Let,
            TokenKind::Identifier("y".into()),
            TokenKind::Assign,
            TokenKind::Integer(10),
            TokenKind::As,
            TokenKind::Minus,
            TokenKind::Integer(1),
            TokenKind::Semicolon,
            TokenKind::Identifier("y".into()),
            TokenKind::Eof,
        ]
    );
}
