/// Incremental UTF-8 decoder for a chunked text body.
///
/// A read may end in the middle of a multi-byte character; those trailing
/// bytes are held back and completed by the next read instead of being
/// decoded on their own. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
  pending: Vec<u8>,
}

impl Utf8StreamDecoder {
  pub fn decode(&mut self, bytes: &[u8]) -> String {
    self.pending.extend_from_slice(bytes);
    let mut out = String::new();
    loop {
      match std::str::from_utf8(&self.pending) {
        Ok(text) => {
          out.push_str(text);
          self.pending.clear();
          break;
        }
        Err(err) => {
          let valid = err.valid_up_to();
          out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
          match err.error_len() {
            // incomplete sequence at the end: wait for more bytes
            None => {
              self.pending.drain(..valid);
              break;
            }
            Some(bad) => {
              out.push(char::REPLACEMENT_CHARACTER);
              self.pending.drain(..valid + bad);
            }
          }
        }
      }
    }
    out
  }

  /// Decodes whatever is still buffered once the body has ended.
  pub fn finish(&mut self) -> String {
    let rest = String::from_utf8_lossy(&self.pending).into_owned();
    self.pending.clear();
    rest
  }
}
