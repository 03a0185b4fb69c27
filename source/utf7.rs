//! Modified UTF-7 mailbox name encoding (RFC 3501 §5.1.3).
//!
//! Ported from the teacher's `utf7_to_utf8` (decode direction only, since `sin` never sends
//! mailbox names the server didn't already give it); the encode direction is new here, since
//! this engine issues `LIST`/`EXAMINE` against caller-supplied names and has to go the other
//! way. Same base64 engine (`IMAP_MUTF7` alphabet, unpadded) and `encoding_rs::UTF_16BE` as the
//! teacher uses for decode.

use base64::Engine as _;

use crate::error::{Error, Result};

fn engine() -> base64::engine::GeneralPurpose {
  base64::engine::GeneralPurpose::new(
    &base64::alphabet::IMAP_MUTF7,
    base64::engine::general_purpose::NO_PAD,
  )
}

/// Decodes a wire-form mailbox name into a Rust `str`.
pub fn decode(input: &[u8]) -> Result<String> {
  let engine = engine();
  let mut buffer = Vec::new();
  let mut output = String::new();
  let mut i = 0;
  while i < input.len() {
    match input[i] {
      // "&" shifts to modified BASE64, "-" shifts back to US-ASCII.
      b'&' => {
        let start = i;
        loop {
          i += 1;
          if i == input.len() {
            return Err(bad(input));
          }
          if input[i] == b'-' {
            break;
          }
        }
        if start + 1 == i {
          // "&-" is the escape for a literal "&".
          output.push('&');
        } else {
          buffer.clear();
          engine
            .decode_vec(&input[start + 1..i], &mut buffer)
            .map_err(|_| bad(input))?;
          let mut decoder = encoding_rs::UTF_16BE.new_decoder_without_bom_handling();
          let (result, _) = decoder.decode_to_string_without_replacement(&buffer, &mut output, true);
          if !matches!(result, encoding_rs::DecoderResult::InputEmpty) {
            return Err(bad(input));
          }
        }
      }
      // Printable US-ASCII except "&" represents itself: 0x20-0x25, 0x27-0x7e.
      c @ (0x20..=0x25 | 0x27..=0x7e) => output.push(c as char),
      _ => return Err(bad(input)),
    }
    i += 1;
  }
  Ok(output)
}

fn bad(input: &[u8]) -> Error {
  Error::protocol(format!("invalid modified UTF-7 mailbox name: {input:?}"))
}

/// Encodes a mailbox name for the wire. Printable ASCII except `&` passes through unchanged;
/// everything else is batched into UTF-16BE runs shifted in with `&` and out with `-`.
pub fn encode(input: &str) -> String {
  let engine = engine();
  let mut output = String::new();
  let mut pending: Vec<u16> = Vec::new();

  let flush = |pending: &mut Vec<u16>, output: &mut String| {
    if pending.is_empty() {
      return;
    }
    let mut bytes = Vec::with_capacity(pending.len() * 2);
    for unit in pending.iter() {
      bytes.extend_from_slice(&unit.to_be_bytes());
    }
    output.push('&');
    output.push_str(&engine.encode(bytes));
    output.push('-');
    pending.clear();
  };

  for ch in input.chars() {
    if ch == '&' {
      flush(&mut pending, &mut output);
      output.push_str("&-");
    } else if ch.is_ascii() && (0x20..=0x7e).contains(&(ch as u32)) {
      flush(&mut pending, &mut output);
      output.push(ch);
    } else {
      let mut units = [0u16; 2];
      pending.extend_from_slice(ch.encode_utf16(&mut units));
    }
  }
  flush(&mut pending, &mut output);
  output
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decode_ascii_passthrough() {
    assert_eq!("INBOX", decode(b"INBOX").unwrap());
  }

  #[test]
  fn decode_escaped_ampersand() {
    assert_eq!("&", decode(b"&-").unwrap());
  }

  #[test]
  fn decode_mixed_path() {
    assert_eq!(
      "~peter/mail/日本語/台北",
      decode(b"~peter/mail/&ZeVnLIqe-/&U,BTFw-").unwrap()
    );
  }

  #[test]
  fn decode_rejects_unterminated_shift() {
    assert!(decode(b"&Jjo!").is_err());
  }

  #[test]
  fn decode_smiley() {
    assert_eq!("☺!", decode("&Jjo-!".as_bytes()).unwrap());
  }

  #[test]
  fn encode_ascii_passthrough() {
    assert_eq!("INBOX", encode("INBOX"));
  }

  #[test]
  fn encode_escapes_ampersand() {
    assert_eq!("Q&-A", encode("Q&A"));
  }

  #[test]
  fn encode_decode_roundtrip() {
    for name in ["INBOX", "日本語/台北", "Q&A", "~peter/mail/日本語", "plain & mixed"] {
      let wire = encode(name);
      assert_eq!(name, decode(wire.as_bytes()).unwrap());
    }
  }
}
