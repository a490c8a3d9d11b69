use std::io::Write;

/// Thin wrapper over a byte sink that [`super::Serialize`] impls write into.
#[derive(Debug)]
pub struct Serializer<W> {
    stream: W,
}

impl<W> Serializer<W> {
    pub fn new(writer: W) -> Self {
        Self { stream: writer }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<()>
    where
        W: Write,
    {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.stream
    }
}
