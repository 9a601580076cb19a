use super::*;

/// Append-only byte buffer with an independent read cursor.
///
/// The bytes are reference counted so a buffer loaded once from the store
/// can back several readers; writing to a shared buffer copies it first.
/// All integers are little-endian.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Arc<Vec<u8>>,
    read_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Arc::new(Vec::with_capacity(capacity)),
            read_pos: 0,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.as_ref().clone()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn set_read_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::corrupt(format!(
                "read position {pos} beyond buffer of {} bytes",
                self.data.len()
            )));
        }
        self.read_pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    fn put(&mut self, bytes: &[u8]) {
        Arc::make_mut(&mut self.data).extend_from_slice(bytes);
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(Error::corrupt(format!(
                "buffer underflow reading {what}: need {n} bytes, {} left",
                self.remaining()
            )));
        }
        let start = self.read_pos;
        self.read_pos += n;
        Ok(&self.data[start..start + n])
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put(&v.to_le_bytes());
    }

    /// Length-prefixed blob.
    pub fn put_blob(&mut self, v: &[u8]) {
        self.put_u64(v.len() as u64);
        self.put(v);
    }

    pub fn put_string(&mut self, v: &str) {
        self.put_blob(v.as_bytes());
    }

    /// Any serde value, bincode encoded and length-prefixed.
    pub fn put_value<T: Serialize + ?Sized>(&mut self, v: &T) -> Result<()> {
        let bytes = bincode::serialize(v)?;
        self.put_blob(&bytes);
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>("u8")?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::corrupt(format!("invalid bool byte {other}"))),
        }
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array("i32")?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array("u32")?))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array("i64")?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array("u64")?))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array("f64")?))
    }

    pub fn get_blob(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.get_u64()?)
            .map_err(|_| Error::corrupt("blob length exceeds address space"))?;
        Ok(self.take(len, "blob")?.to_vec())
    }

    pub fn get_string(&mut self) -> Result<String> {
        String::from_utf8(self.get_blob()?)
            .map_err(|e| Error::corrupt(format!("invalid utf-8 string: {e}")))
    }

    pub fn get_value<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.get_blob()?;
        Ok(bincode::deserialize(&bytes)?)
    }
}
