use std::fmt::Write;

use bytes::{Bytes, BytesMut};

/// A command line sent to the server as an array of bulk strings.
#[derive(Debug, Clone)]
pub struct Command {
    name: &'static str,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self { name, args: vec![] }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut serializer = Serializer::default();
        serializer.write_array_len(self.args.len() + 1);
        serializer.write_bytes(self.name.as_bytes());
        for arg in &self.args {
            serializer.write_bytes(arg);
        }

        serializer.into_output()
    }
}

#[derive(Debug, Default)]
struct Serializer {
    output: BytesMut,
}

impl Serializer {
    fn into_output(self) -> Bytes {
        self.output.freeze()
    }

    // Writing into a BytesMut can't fail.
    fn write_array_len(&mut self, len: usize) {
        let _ = write!(&mut self.output, "*{len}\r\n");
    }

    fn write_bytes(&mut self, s: &[u8]) {
        let _ = write!(&mut self.output, "${}\r\n", s.len());
        self.output.extend_from_slice(s);
        self.output.extend_from_slice(b"\r\n");
    }
}
