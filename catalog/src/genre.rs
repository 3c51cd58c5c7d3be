use bincode::{Decode, Encode};

use crate::CatalogError;

/// Genre codes understood by the cartridge menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[repr(u8)]
pub enum Genre {
    Shooter = 1,
    Action,
    Sports,
    Misc,
    Casino,
    Driving,
    Platform,
    Puzzle,
    Boxing,
    Wrestling,
    Strategy,
    Soccer,
    Golf,
    BeatEmUp,
    Baseball,
    Mahjong,
    Board,
    Tennis,
    Fighter,
    HorseRacing,
    Other,
}

const ALL: [Genre; 21] = [
    Genre::Shooter,
    Genre::Action,
    Genre::Sports,
    Genre::Misc,
    Genre::Casino,
    Genre::Driving,
    Genre::Platform,
    Genre::Puzzle,
    Genre::Boxing,
    Genre::Wrestling,
    Genre::Strategy,
    Genre::Soccer,
    Genre::Golf,
    Genre::BeatEmUp,
    Genre::Baseball,
    Genre::Mahjong,
    Genre::Board,
    Genre::Tennis,
    Genre::Fighter,
    Genre::HorseRacing,
    Genre::Other,
];

impl Genre {
    /// The numeric code stored in the screenshot trailer.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        ALL.get(usize::from(code.checked_sub(1)?)).copied()
    }

    fn name(self) -> &'static str {
        match self {
            Genre::Shooter => "shooter",
            Genre::Action => "action",
            Genre::Sports => "sports",
            Genre::Misc => "misc",
            Genre::Casino => "casino",
            Genre::Driving => "driving",
            Genre::Platform => "platform",
            Genre::Puzzle => "puzzle",
            Genre::Boxing => "boxing",
            Genre::Wrestling => "wrestling",
            Genre::Strategy => "strategy",
            Genre::Soccer => "soccer",
            Genre::Golf => "golf",
            Genre::BeatEmUp => "beatemup",
            Genre::Baseball => "baseball",
            Genre::Mahjong => "mahjong",
            Genre::Board => "board",
            Genre::Tennis => "tennis",
            Genre::Fighter => "fighter",
            Genre::HorseRacing => "horseracing",
            Genre::Other => "other",
        }
    }
}

impl std::str::FromStr for Genre {
    type Err = CatalogError;

    /// Accepts either the numeric code or the genre name, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| CatalogError::UnknownGenre(s.to_string()));
        }
        let wanted = s.to_lowercase();
        ALL.iter()
            .find(|genre| genre.name() == wanted)
            .copied()
            .ok_or_else(|| CatalogError::UnknownGenre(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_span_one_to_twenty_one() {
        assert_eq!(Genre::Shooter.code(), 1);
        assert_eq!(Genre::Other.code(), 21);
        assert_eq!(Genre::from_code(1), Some(Genre::Shooter));
        assert_eq!(Genre::from_code(21), Some(Genre::Other));
        assert_eq!(Genre::from_code(0), None);
        assert_eq!(Genre::from_code(22), None);
    }

    #[test]
    fn parses_names_and_codes() {
        assert_eq!("Platform".parse::<Genre>().unwrap(), Genre::Platform);
        assert_eq!("BEATEMUP".parse::<Genre>().unwrap(), Genre::BeatEmUp);
        assert_eq!("7".parse::<Genre>().unwrap(), Genre::Platform);
        assert!("jazz".parse::<Genre>().is_err());
    }
}
