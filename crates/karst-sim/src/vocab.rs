// karst-sim/src/vocab.rs
//
// Character-level vocabulary: four control tokens, then one token per Unicode
// scalar value at a fixed offset. Tokenization is trivially invertible, which
// is exactly what the round-trip contract asks of a real tokenizer.

use karst_abi::Token;

pub const TOKEN_PAD: Token = Token(0);
pub const TOKEN_BOS: Token = Token(1);
pub const TOKEN_EOS: Token = Token(2);
pub const TOKEN_EOT: Token = Token(3);

pub const PIECE_PAD: &str = "<pad>";
pub const PIECE_BOS: &str = "<s>";
pub const PIECE_EOS: &str = "</s>";
pub const PIECE_EOT: &str = "<|eot|>";

/// First non-control token id; token = CHAR_BASE + scalar value.
const CHAR_BASE: i32 = 4;

pub fn tokenize(text: &str, add_special: bool, parse_special: bool) -> Vec<Token> {
    let mut out = Vec::with_capacity(text.chars().count() + 1);
    if add_special {
        out.push(TOKEN_BOS);
    }

    let mut rest = text;
    'outer: while !rest.is_empty() {
        if parse_special {
            for (piece, token) in [
                (PIECE_EOS, TOKEN_EOS),
                (PIECE_BOS, TOKEN_BOS),
                (PIECE_EOT, TOKEN_EOT),
                (PIECE_PAD, TOKEN_PAD),
            ] {
                if let Some(tail) = rest.strip_prefix(piece) {
                    out.push(token);
                    rest = tail;
                    continue 'outer;
                }
            }
        }
        // unwrap is fine: rest is non-empty
        let ch = rest.chars().next().unwrap();
        out.push(Token(CHAR_BASE + ch as i32));
        rest = &rest[ch.len_utf8()..];
    }
    out
}

/// Render a token's piece. Control tokens render their piece text only when
/// `special` is set, matching how real vocabularies hide control tokens from
/// ordinary detokenization.
pub fn token_to_piece(token: Token, special: bool) -> Result<String, String> {
    match token {
        TOKEN_PAD | TOKEN_BOS | TOKEN_EOS | TOKEN_EOT => {
            if special {
                Ok(control_piece(token).to_string())
            } else {
                Ok(String::new())
            }
        }
        Token(id) if id >= CHAR_BASE => char::from_u32((id - CHAR_BASE) as u32)
            .map(String::from)
            .ok_or_else(|| format!("token {id} is not a valid scalar value")),
        Token(id) => Err(format!("unknown token id {id}")),
    }
}

fn control_piece(token: Token) -> &'static str {
    match token {
        TOKEN_PAD => PIECE_PAD,
        TOKEN_BOS => PIECE_BOS,
        TOKEN_EOS => PIECE_EOS,
        _ => PIECE_EOT,
    }
}

pub fn is_eog(token: Token) -> bool {
    token == TOKEN_EOS || token == TOKEN_EOT
}
