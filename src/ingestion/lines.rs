//! Universal-newline line splitting over any [`BufRead`].
//!
//! `\n`, `\r\n` and a lone `\r` all terminate a line. Yielded lines never include the terminator.
//! Reading stops at the first terminator, so memory is bounded by the longest line.

use std::io::{self, BufRead};

pub(crate) struct Lines<R> {
    inner: R,
    /// The previous line ended in `\r`; a `\n` opening the next buffer belongs to it.
    after_cr: bool,
    done: bool,
}

impl<R: BufRead> Lines<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            after_cr: false,
            done: false,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.after_cr {
            self.after_cr = false;
            if self.inner.fill_buf()?.first() == Some(&b'\n') {
                self.inner.consume(1);
            }
        }

        let mut line = Vec::new();
        let mut read_any = false;
        loop {
            let buf = match self.inner.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if buf.is_empty() {
                return Ok(read_any.then_some(line));
            }
            read_any = true;
            match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(i) => {
                    self.after_cr = buf[i] == b'\r';
                    line.extend_from_slice(&buf[..i]);
                    self.inner.consume(i + 1);
                    return Ok(Some(line));
                }
                None => {
                    let n = buf.len();
                    line.extend_from_slice(buf);
                    self.inner.consume(n);
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_line() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
