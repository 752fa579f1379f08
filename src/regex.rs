use nom::Err as NomErr;
use nom::IResult;
use nom::Parser;
use nom::error::ErrorKind as NomErrorKind;
use nom::error::ParseError;

/// One token of the surface syntax. Quantifiers carry their laziness instead
/// of being separate alphabet entries; `Concatenate` never appears in source
/// text and is inserted by [`insert_concatenation`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Token {
	Literal(u8),
	Alternate,
	ZeroOrOne { lazy: bool },
	ZeroOrMore { lazy: bool },
	OneOrMore { lazy: bool },
	OpenGroup,
	CloseGroup,
	Concatenate,
}

#[derive(Debug)]
pub struct PatternError<'a> {
	pub consumed: &'a [u8],
	pub remaining: &'a [u8],
	pub kind: PatternErrorKind,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PatternErrorKind {
	/// The pattern ends in a backslash with nothing to escape.
	DanglingEscape,
	/// A group delimiter without its partner.
	UnbalancedGroup,
	/// An operator with too few operands (e.g. a leading quantifier or a
	/// trailing alternation bar).
	MissingOperand,
	/// The empty pattern.
	EmptyPattern,
	/// An error from nom; shouldn't happen, but used to implement
	/// [`nom::error::ParseError`].
	Nom(NomErrorKind),
}

#[derive(Debug)]
struct PatternParsingError<'a> {
	pub input: &'a [u8],
	pub kind: PatternErrorKind,
}

impl<'a> ParseError<&'a [u8]> for PatternParsingError<'a> {
	fn from_error_kind(input: &'a [u8], nom: NomErrorKind) -> Self {
		Self {
			input,
			kind: PatternErrorKind::Nom(nom),
		}
	}

	fn append(_input: &'a [u8], _kind: NomErrorKind, other: Self) -> Self {
		other
	}
}

impl PatternErrorKind {
	fn failure(self, input: &[u8]) -> NomErr<PatternParsingError<'_>> {
		NomErr::Failure(PatternParsingError { input, kind: self })
	}
}

type ParsingResult<'a, T> = IResult<&'a [u8], T, PatternParsingError<'a>>;

/// Lexes, splices in concatenation, and converts to postfix: everything up
/// to Thompson construction.
pub fn parse(pattern: &[u8]) -> Result<Vec<Token>, PatternError<'_>> {
	if pattern.is_empty() {
		return Err(PatternError {
			consumed: pattern,
			remaining: b"",
			kind: PatternErrorKind::EmptyPattern,
		});
	}

	let tokens: Vec<Token> = lex(pattern)?;
	let tokens: Vec<Token> = insert_concatenation(&tokens);
	to_postfix(&tokens).map_err(|kind| PatternError {
		consumed: pattern,
		remaining: b"",
		kind,
	})
}

/// Scans the pattern into tokens. `\x` turns any byte into a literal;
/// `?`, `*` and `+` peek one byte for the lazy `?` suffix.
pub fn lex(pattern: &[u8]) -> Result<Vec<Token>, PatternError<'_>> {
	use nom::multi::many0;

	match many0(lex_token).parse(pattern) {
		Ok((remaining, tokens)) => {
			assert!(remaining.is_empty());
			Ok(tokens)
		},
		Err(NomErr::Incomplete(_)) => {
			panic!("We shouldn't be using anything that can return this!");
		},
		Err(NomErr::Error(err) | NomErr::Failure(err)) => {
			let consumed: &[u8] = &pattern[..pattern.len() - err.input.len()];
			Err(PatternError {
				consumed,
				remaining: err.input,
				kind: err.kind,
			})
		},
	}
}

fn lex_token(input: &[u8]) -> ParsingResult<'_, Token> {
	let (&byte, rest): (&u8, &[u8]) = match input.split_first() {
		Some(split) => split,
		None => {
			return Err(NomErr::Error(PatternParsingError::from_error_kind(
				input,
				NomErrorKind::Eof,
			)));
		},
	};

	match byte {
		b'\\' => match rest.split_first() {
			Some((&escaped, rest)) => Ok((rest, Token::Literal(escaped))),
			None => Err(PatternErrorKind::DanglingEscape.failure(input)),
		},
		b'|' => Ok((rest, Token::Alternate)),
		b'(' => Ok((rest, Token::OpenGroup)),
		b')' => Ok((rest, Token::CloseGroup)),
		b'?' | b'*' | b'+' => {
			let (lazy, rest): (bool, &[u8]) = match rest.split_first() {
				Some((&b'?', after_suffix)) => (true, after_suffix),
				_ => (false, rest),
			};
			let token: Token = match byte {
				b'?' => Token::ZeroOrOne { lazy },
				b'*' => Token::ZeroOrMore { lazy },
				_ => Token::OneOrMore { lazy },
			};
			Ok((rest, token))
		},
		literal => Ok((rest, Token::Literal(literal))),
	}
}

/// Inserts the synthetic [`Token::Concatenate`] between every adjacent pair
/// where the left ends an expression and the right begins one.
pub fn insert_concatenation(tokens: &[Token]) -> Vec<Token> {
	fn ends_expression(token: Token) -> bool {
		matches!(
			token,
			Token::Literal(_)
				| Token::CloseGroup
				| Token::ZeroOrOne { .. }
				| Token::ZeroOrMore { .. }
				| Token::OneOrMore { .. }
		)
	}

	fn begins_expression(token: Token) -> bool {
		matches!(token, Token::Literal(_) | Token::OpenGroup)
	}

	let mut result: Vec<Token> = Vec::with_capacity(tokens.len() * 2);

	for (i, &token) in tokens.iter().enumerate() {
		if i > 0 && ends_expression(tokens[i - 1]) && begins_expression(token) {
			result.push(Token::Concatenate);
		}
		result.push(token);
	}

	result
}

fn precedence(token: Token) -> u8 {
	match token {
		Token::ZeroOrOne { .. } | Token::ZeroOrMore { .. } | Token::OneOrMore { .. } => 3,
		Token::Concatenate => 2,
		Token::Alternate => 1,
		Token::Literal(_) | Token::OpenGroup | Token::CloseGroup => unreachable!("not an operator"),
	}
}

/// Shunting-yard conversion to postfix.
///
/// Group delimiters are passed through to the output stream (they demarcate
/// capture boundaries for the Thompson builder) while acting as barriers on
/// the operator stack.
pub fn to_postfix(tokens: &[Token]) -> Result<Vec<Token>, PatternErrorKind> {
	let mut output: Vec<Token> = Vec::with_capacity(tokens.len());
	let mut operators: Vec<Token> = Vec::new();

	for &token in tokens {
		match token {
			Token::Literal(_) => output.push(token),
			Token::OpenGroup => {
				operators.push(Token::OpenGroup);
				output.push(Token::OpenGroup);
			},
			Token::CloseGroup => {
				loop {
					match operators.pop() {
						Some(Token::OpenGroup) => break,
						Some(operator) => output.push(operator),
						None => return Err(PatternErrorKind::UnbalancedGroup),
					}
				}
				output.push(Token::CloseGroup);
			},
			operator => {
				while let Some(&top) = operators.last() {
					if top == Token::OpenGroup || precedence(top) < precedence(operator) {
						break;
					}
					output.push(operators.pop().unwrap());
				}
				operators.push(operator);
			},
		}
	}

	while let Some(operator) = operators.pop() {
		if operator == Token::OpenGroup {
			return Err(PatternErrorKind::UnbalancedGroup);
		}
		output.push(operator);
	}

	Ok(output)
}
