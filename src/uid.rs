use uuid::Uuid;

/// Default upload id generator.
pub struct Uid;

impl Uid {
    pub const LENGTH: usize = 32;

    /// 32 lowercase hex characters from a random (v4) uuid.
    pub fn rand() -> String {
        Uuid::new_v4().simple().to_string()
    }
}
