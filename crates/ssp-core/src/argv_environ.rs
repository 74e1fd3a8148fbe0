//! Program arguments and environment as packed NUL-terminated strings.

use crate::errno::Errno;
use crate::Result;

#[derive(Debug, Default, Clone)]
struct Packed {
    buf: Vec<u8>,
    offsets: Vec<u32>,
}

impl Packed {
    fn new<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut packed = Packed::default();
        for item in items {
            let item = item.as_ref();
            if item.contains(&0) {
                return Err(Errno::Ilseq);
            }
            packed
                .offsets
                .push(u32::try_from(packed.buf.len()).map_err(|_| Errno::TooBig)?);
            packed.buf.extend_from_slice(item);
            packed.buf.push(0);
        }
        if u32::try_from(packed.buf.len()).is_err() {
            return Err(Errno::TooBig);
        }
        Ok(packed)
    }

    fn sizes(&self) -> (usize, usize) {
        (self.offsets.len(), self.buf.len())
    }

    fn copy_out(&self, offsets: &mut [u32], buf: &mut [u8]) -> Result<()> {
        if offsets.len() < self.offsets.len() || buf.len() < self.buf.len() {
            return Err(Errno::Inval);
        }
        offsets[..self.offsets.len()].copy_from_slice(&self.offsets);
        buf[..self.buf.len()].copy_from_slice(&self.buf);
        Ok(())
    }

    fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.offsets.iter().map(move |&start| {
            let rest = &self.buf[start as usize..];
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            &rest[..end]
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct ArgvEnviron {
    argv: Packed,
    environ: Packed,
}

impl ArgvEnviron {
    /// Environment entries are expected in `KEY=VALUE` form.
    pub fn new<A, E, S, T>(args: A, env: E) -> Result<Self>
    where
        A: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<[u8]>,
        T: AsRef<[u8]>,
    {
        Ok(Self {
            argv: Packed::new(args)?,
            environ: Packed::new(env)?,
        })
    }

    /// `(argc, argv_buf_size)`.
    pub fn args_sizes(&self) -> (usize, usize) {
        self.argv.sizes()
    }

    /// Write each argument's offset into `argv` and the packed strings
    /// into `argv_buf`.
    pub fn args_get(&self, argv: &mut [u32], argv_buf: &mut [u8]) -> Result<()> {
        self.argv.copy_out(argv, argv_buf)
    }

    /// `(environ_count, environ_buf_size)`.
    pub fn environ_sizes(&self) -> (usize, usize) {
        self.environ.sizes()
    }

    pub fn environ_get(&self, environ: &mut [u32], environ_buf: &mut [u8]) -> Result<()> {
        self.environ.copy_out(environ, environ_buf)
    }

    pub fn args(&self) -> impl Iterator<Item = &[u8]> {
        self.argv.iter()
    }

    pub fn environ(&self) -> impl Iterator<Item = &[u8]> {
        self.environ.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let ae = ArgvEnviron::new(["prog", "-v", ""], ["A=1", "PATH=/bin"]).unwrap();
        assert_eq!(ae.args_sizes(), (3, 9));
        assert_eq!(ae.environ_sizes(), (2, 14));

        let mut offsets = [0u32; 3];
        let mut buf = [0xffu8; 9];
        ae.args_get(&mut offsets, &mut buf).unwrap();
        assert_eq!(offsets, [0, 5, 8]);
        assert_eq!(&buf, b"prog\0-v\0\0");

        let args: Vec<&[u8]> = ae.args().collect();
        assert_eq!(args, vec![&b"prog"[..], b"-v", b""]);
    }

    #[test]
    fn test_short_buffers_rejected() {
        let ae = ArgvEnviron::new(["a"], ["B=2"]).unwrap();
        let mut offsets = [0u32; 1];
        let mut buf = [0u8; 3];
        assert_eq!(ae.environ_get(&mut offsets, &mut buf).unwrap_err(), Errno::Inval);
        let mut none: [u32; 0] = [];
        assert_eq!(ae.args_get(&mut none, &mut [0u8; 2]).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn test_nul_rejected() {
        let err = ArgvEnviron::new(["a\0b"], Vec::<String>::new()).unwrap_err();
        assert_eq!(err, Errno::Ilseq);
    }
}
