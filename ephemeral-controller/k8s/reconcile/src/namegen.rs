use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Namespace names are DNS labels.
pub const MAX_NAME_LEN: usize = 63;

const PREFIX: &str = "ephemeral-";
const SUFFIX_LEN: usize = 7;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Produces namespace names for new environments.
///
/// Each generator owns its random source, seeded once from the OS.
#[derive(Debug)]
pub struct NameGenerator {
    rng: Mutex<StdRng>,
}

// === impl NameGenerator ===

impl NameGenerator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn from_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Returns a sanitized form of `hint` or, when no hint is given, a random
    /// `ephemeral-xxxxxxx` name.
    ///
    /// No uniqueness check is made; a collision surfaces when the namespace is
    /// created.
    pub fn generate(&self, hint: Option<&str>) -> String {
        match hint.filter(|h| !h.is_empty()) {
            Some(hint) => sanitize(hint),
            None => self.random(),
        }
    }

    fn random(&self) -> String {
        let mut rng = self.rng.lock();
        let suffix = (0..SUFFIX_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect::<String>();
        format!("{PREFIX}{suffix}")
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(hint: &str) -> String {
    hint.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        })
        .take(MAX_NAME_LEN)
        .collect()
}
