//! Data structures describing a decoded stack.

use std::collections::HashMap;

use super::error::{Result, StackError};

/// A point in card coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

/// A width and height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

/// A rectangle in card coordinates, top/left inclusive, bottom/right exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl Rectangle {
    pub fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Rectangle {
            top,
            left,
            bottom,
            right,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Whether the rectangle encloses no pixel at all.
    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// The largest rectangle contained in both operands. The result may be
    /// empty.
    pub fn intersection(&self, other: &Rectangle) -> Rectangle {
        Rectangle {
            top: self.top.max(other.top),
            left: self.left.max(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.min(other.right),
        }
    }
}

/// The two generations of the stack file format. Version 1 lays most block
/// fields out four bytes earlier than version 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVersion {
    V1,
    V2,
}

impl FileVersion {
    /// Maps the format number stored in the stack block to a file version.
    pub fn from_format(format: u32) -> Result<Self> {
        match format {
            1..=8 => Ok(FileVersion::V1),
            9 | 10 => Ok(FileVersion::V2),
            other => Err(StackError::CorruptedStack(format!(
                "unknown stack format {other}"
            ))),
        }
    }

    /// Shifts a version 2 field offset to its position in this version.
    pub fn offset(self, base: usize) -> usize {
        match self {
            FileVersion::V1 => base - 4,
            FileVersion::V2 => base,
        }
    }
}

/// The user level setting of a stack, restricting what the user can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UserLevel {
    Browse = 1,
    Typing = 2,
    Painting = 3,
    Authoring = 4,
    Script = 5,
}

impl UserLevel {
    /// An out-of-range or zero value falls back to the most permissive level,
    /// which is what the application did.
    pub fn from_index(index: u16) -> UserLevel {
        match index {
            1 => UserLevel::Browse,
            2 => UserLevel::Typing,
            3 => UserLevel::Painting,
            4 => UserLevel::Authoring,
            _ => UserLevel::Script,
        }
    }
}

/// Release state of a HyperCard version stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    Development,
    Alpha,
    Beta,
    Final,
}

/// A decoded HyperCard version stamp, in the classic 'vers' layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperCardVersion {
    pub major: u8,
    pub minor1: u8,
    pub minor2: u8,
    pub state: ReleaseState,
    pub release: u8,
}

impl HyperCardVersion {
    /// Decodes a packed version code. A zero code means the field was never
    /// written and yields no version.
    pub fn from_code(code: u32) -> Option<HyperCardVersion> {
        if code == 0 {
            return None;
        }
        let state = match (code >> 8) & 0xFF {
            0x20 => ReleaseState::Development,
            0x40 => ReleaseState::Alpha,
            0x60 => ReleaseState::Beta,
            _ => ReleaseState::Final,
        };
        Some(HyperCardVersion {
            major: ((code >> 24) & 0xFF) as u8,
            minor1: ((code >> 20) & 0xF) as u8,
            minor2: ((code >> 16) & 0xF) as u8,
            state,
            release: (code & 0xFF) as u8,
        })
    }
}

impl std::fmt::Display for HyperCardVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor1, self.minor2)?;
        match self.state {
            ReleaseState::Final => Ok(()),
            ReleaseState::Beta => write!(f, "b{}", self.release),
            ReleaseState::Alpha => write!(f, "a{}", self.release),
            ReleaseState::Development => write!(f, "d{}", self.release),
        }
    }
}

/// Whether a part is a button or a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartType {
    Button,
    Field,
}

/// Visual style of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStyle {
    Transparent,
    Opaque,
    Rectangle,
    RoundRect,
    Shadow,
    CheckBox,
    Radio,
    Scrolling,
    Standard,
    Default,
    Oval,
    Popup,
}

impl PartStyle {
    /// Unknown style bytes appear in stacks edited by third-party tools, so
    /// they fall back to transparent instead of failing the whole card.
    pub fn from_index(index: u8) -> PartStyle {
        match index {
            1 => PartStyle::Opaque,
            2 => PartStyle::Rectangle,
            3 => PartStyle::RoundRect,
            4 => PartStyle::Shadow,
            5 => PartStyle::CheckBox,
            6 => PartStyle::Radio,
            7 => PartStyle::Scrolling,
            8 => PartStyle::Standard,
            9 => PartStyle::Default,
            10 => PartStyle::Oval,
            11 => PartStyle::Popup,
            _ => PartStyle::Transparent,
        }
    }
}

/// A button or field laid out on a card or background.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub identifier: u16,
    pub part_type: PartType,
    pub style: PartStyle,
    pub rectangle: Rectangle,
    pub visible: bool,
    pub name: String,
    pub script: String,
    /// The text content of the part stored in its own layer, if any.
    pub content: Option<String>,
}

/// A card of the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub identifier: u32,
    pub background_identifier: u32,
    /// Set when the card is marked, from its page reference.
    pub marked: bool,
    /// True for the first card of each contiguous run of one background in
    /// file order.
    pub is_start_of_background: bool,
    pub bitmap_identifier: Option<u32>,
    pub cant_delete: bool,
    pub show_picture: bool,
    pub dont_search: bool,
    pub name: String,
    pub script: String,
    pub parts: Vec<Part>,
    /// Text a card stores for parts of its background, keyed by the
    /// background part identifier.
    pub background_content_overrides: HashMap<u16, String>,
}

/// A background shared by one or more cards.
#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    pub identifier: u32,
    /// Number of cards using this background.
    pub card_count: u32,
    pub next_background_identifier: u32,
    pub previous_background_identifier: u32,
    pub bitmap_identifier: Option<u32>,
    pub cant_delete: bool,
    pub show_picture: bool,
    pub dont_search: bool,
    pub name: String,
    pub script: String,
    pub parts: Vec<Part>,
}

/// Global properties of a stack, read from the stack block.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    pub card_count: u32,
    pub background_count: u32,
    pub first_card_identifier: u32,
    pub first_background_identifier: u32,
    /// Hash of the stack password. The password only locks settings unless
    /// private access is also set.
    pub password_hash: Option<u32>,
    pub user_level: UserLevel,
    pub cant_abort: bool,
    pub cant_delete: bool,
    pub cant_modify: bool,
    pub cant_peek: bool,
    pub private_access: bool,
    pub version_at_creation: Option<HyperCardVersion>,
    pub version_at_last_compacting: Option<HyperCardVersion>,
    pub version_at_last_modification_since_last_compacting: Option<HyperCardVersion>,
    pub version_at_last_modification: Option<HyperCardVersion>,
    pub marked_card_count: u32,
    /// Position of the stack window on screen when last saved.
    pub window_rectangle: Rectangle,
    /// Resolution of the screen where the window rectangle was saved.
    pub screen_rectangle: Rectangle,
    /// Scroll origin of the card window, for windows smaller than the card.
    pub scroll: Point,
    /// Size of the cards, 512 by 342 unless the stack was resized.
    pub size: Size,
    pub script: String,
}
