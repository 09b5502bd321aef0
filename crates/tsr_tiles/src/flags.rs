use bitflags::bitflags;

use crate::error::TileError;

bitflags! {
    /// Per-tile behaviour bits. Collision and interaction code only ever
    /// tests these; the renderer ignores them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TileFlags: u32 {
        const SOLID = 1 << 0;
        const DESTRUCTIBLE = 1 << 1;
        const ANIMATED = 1 << 2;
        const STATIC_NPC = 1 << 3;
        const TELEPORTER = 1 << 4;
        const CUSTOM_CODE = 1 << 5;
        const INTERACTABLE = 1 << 6;
    }
}

impl Default for TileFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl TileFlags {
    /// Parse one flag name, case-insensitively.
    pub fn parse_name(name: &str) -> Result<Self, TileError> {
        let name = name.trim();
        Self::from_name(&name.to_ascii_uppercase())
            .ok_or_else(|| TileError::UnknownFlag(name.to_string()))
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, TileError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |acc, name| {
            Ok(acc | Self::parse_name(name.as_ref())?)
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        let flags = TileFlags::from_names(["solid", " Destructible "]).expect("parse");
        assert_eq!(flags, TileFlags::SOLID | TileFlags::DESTRUCTIBLE);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = TileFlags::from_names(["SOLID", "SLIPPERY"]).expect_err("unknown");
        assert!(matches!(err, TileError::UnknownFlag(ref n) if n == "SLIPPERY"));
    }

    #[test]
    fn names_round_trip() {
        let flags = TileFlags::TELEPORTER | TileFlags::SOLID;
        assert_eq!(TileFlags::from_names(flags.names()).expect("parse"), flags);
        assert_eq!(flags.names(), vec!["SOLID", "TELEPORTER"]);
    }
}
