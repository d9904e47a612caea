use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

pub const ALGORITHM: &str = "sha256";

// validated `sha256:<64 lowercase hex chars>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    pub fn parse(s: &str) -> Option<Self> {
        let (algo, hex_part) = s.split_once(':')?;
        if algo != ALGORITHM {
            return None;
        }
        if hex_part.len() != 64 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return None;
        }
        Some(Digest(s.to_string()))
    }

    pub fn trim(&self) -> &str {
        self.0.split_once(':').map(|(_, hex)| hex).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Digest::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid digest {s:?}")))
    }
}

pub fn compute_digest_bytes(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    digest_from_hasher(hasher)
}

// rewinds the stream to the start before and after
pub async fn compute_digest_stream<S>(stream: &mut S) -> std::io::Result<Digest>
where
    S: AsyncRead + AsyncSeek + Unpin,
{
    stream.seek(std::io::SeekFrom::Start(0)).await?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    stream.seek(std::io::SeekFrom::Start(0)).await?;
    Ok(digest_from_hasher(hasher))
}

fn digest_from_hasher(hasher: Sha256) -> Digest {
    Digest(format!("{ALGORITHM}:{}", hex::encode(hasher.finalize())))
}
