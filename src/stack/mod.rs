//! Decoding of the stack data fork: block directory, stack header, card
//! index, layers and password gating.
//!
//! The entry point is [`StackFile`]. Opening validates the structure of the
//! file eagerly (directory, header, background cycle) but decodes cards,
//! backgrounds, bitmaps and resources on demand, memoizing each decoded
//! object in a write-once cell so concurrent readers converge on one value.

pub mod block;
pub mod crypto;
pub mod data;
pub mod error;
pub mod layer;
pub mod list;
pub mod models;
pub mod stack_block;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use log::{info, warn};

use crate::image::woba;
use crate::image::MaskedImage;
use crate::resources::{self, Resource};

use block::{Block, BACKGROUND_TAG, BITMAP_TAG, CARD_TAG, LIST_TAG, PAGE_TAG, STACK_TAG};
use crypto::{HeaderDecrypter, RandomXorDecrypter};
use data::{DataRange, FourCharCode};
use error::{Result, StackError};
use layer::{LayerBlockReader, LayerType};
use list::{CardReference, ListBlockReader, PageBlockReader};
use models::{Background, Card, FileVersion, Part, Stack};
use stack_block::StackBlockReader;

/// An open stack file.
///
/// Holds both forks in memory and exposes the decoded object graph. All
/// accessors take `&self`; decoded objects are cached on first access.
pub struct StackFile {
    data: DataRange,
    resource_fork: Option<DataRange>,
    version: FileVersion,
    directory: HashMap<(FourCharCode, u32), usize>,
    list_identifier: u32,
    stack: Stack,
    cards: OnceLock<Vec<Card>>,
    backgrounds: OnceLock<Vec<Background>>,
    resources: OnceLock<Vec<Resource>>,
    bitmaps: Mutex<HashMap<u32, Arc<MaskedImage>>>,
}

impl StackFile {
    /// Opens a stack from its fork contents.
    ///
    /// # Errors
    /// Fails with `MissingPassword` when the stack is private access, and
    /// with the structural errors of the block and header readers.
    pub fn open(data_fork: Vec<u8>, resource_fork: Option<Vec<u8>>) -> Result<StackFile> {
        Self::open_internal(data_fork, resource_fork, None, &RandomXorDecrypter, false)
    }

    /// Opens a stack, providing a password for private access stacks.
    ///
    /// # Errors
    /// Fails with `WrongPassword` when the stack is private access and the
    /// password does not match.
    pub fn open_with_password(
        data_fork: Vec<u8>,
        resource_fork: Option<Vec<u8>>,
        password: &str,
    ) -> Result<StackFile> {
        Self::open_internal(
            data_fork,
            resource_fork,
            Some(password),
            &RandomXorDecrypter,
            false,
        )
    }

    /// Opens a private access stack without its password by recovering the
    /// header cipher stream.
    ///
    /// # Errors
    /// Fails with `MissingPassword` when the header cannot be recovered.
    pub fn open_without_password(
        data_fork: Vec<u8>,
        resource_fork: Option<Vec<u8>>,
    ) -> Result<StackFile> {
        Self::open_internal(data_fork, resource_fork, None, &RandomXorDecrypter, true)
    }

    /// Opens a stack with a caller-supplied header decrypter, for stacks
    /// protected by third-party tools.
    pub fn open_with_decrypter(
        data_fork: Vec<u8>,
        resource_fork: Option<Vec<u8>>,
        password: &str,
        decrypter: &dyn HeaderDecrypter,
    ) -> Result<StackFile> {
        Self::open_internal(data_fork, resource_fork, Some(password), decrypter, false)
    }

    fn open_internal(
        data_fork: Vec<u8>,
        resource_fork: Option<Vec<u8>>,
        password: Option<&str>,
        decrypter: &dyn HeaderDecrypter,
        recover_header: bool,
    ) -> Result<StackFile> {
        let data = DataRange::whole(Arc::from(data_fork));
        let directory = block::read_directory(&data)?;

        let stack_block = block::read_block_at(&data, 0)?;
        if stack_block.tag != STACK_TAG {
            return Err(StackError::CorruptedStack(format!(
                "the file starts with a {} block instead of a stack block",
                stack_block.tag
            )));
        }

        let raw_reader = StackBlockReader::new(stack_block.body.clone(), None);
        let decoded_header = if raw_reader.read_private_access()? {
            if let Some(password) = password {
                match decrypter.decrypt(&stack_block.body, password)? {
                    Some(header) => Some(header),
                    None => return Err(StackError::WrongPassword),
                }
            } else if recover_header {
                match crypto::hack(&stack_block.body)? {
                    Some(header) => Some(header),
                    None => return Err(StackError::MissingPassword),
                }
            } else {
                return Err(StackError::MissingPassword);
            }
        } else {
            None
        };

        let reader = StackBlockReader::new(stack_block.body.clone(), decoded_header);
        let version = reader.read_version()?;
        let list_identifier = reader.read_list_identifier()?;
        let stack = Self::read_stack(&reader)?;
        if !reader.verify_checksum()? {
            warn!("The stack header checksum does not balance");
        }

        let file = StackFile {
            data,
            resource_fork: resource_fork.map(|bytes| DataRange::whole(Arc::from(bytes))),
            version,
            directory,
            list_identifier,
            stack,
            cards: OnceLock::new(),
            backgrounds: OnceLock::new(),
            resources: OnceLock::new(),
            bitmaps: Mutex::new(HashMap::new()),
        };
        file.validate_background_cycle()?;
        info!(
            "Opened a stack with {} cards and {} backgrounds",
            file.stack.card_count, file.stack.background_count
        );
        Ok(file)
    }

    fn read_stack(reader: &StackBlockReader) -> Result<Stack> {
        Ok(Stack {
            card_count: reader.read_card_count()?,
            background_count: reader.read_background_count()?,
            first_card_identifier: reader.read_first_card_identifier()?,
            first_background_identifier: reader.read_first_background_identifier()?,
            password_hash: reader.read_password_hash()?,
            user_level: reader.read_user_level()?,
            cant_abort: reader.read_cant_abort()?,
            cant_delete: reader.read_cant_delete()?,
            cant_modify: reader.read_cant_modify()?,
            cant_peek: reader.read_cant_peek()?,
            private_access: reader.read_private_access()?,
            version_at_creation: reader.read_version_at_creation()?,
            version_at_last_compacting: reader.read_version_at_last_compacting()?,
            version_at_last_modification_since_last_compacting: reader
                .read_version_at_last_modification_since_last_compacting()?,
            version_at_last_modification: reader.read_version_at_last_modification()?,
            marked_card_count: reader.read_marked_card_count()?,
            window_rectangle: reader.read_window_rectangle()?,
            screen_rectangle: reader.read_screen_rectangle()?,
            scroll: reader.read_scroll()?,
            size: reader.read_size()?,
            script: reader.read_script()?,
        })
    }

    /// Global properties of the stack.
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn version(&self) -> FileVersion {
        self.version
    }

    fn find_block(&self, tag: FourCharCode, identifier: u32) -> Result<Block> {
        let offset = self
            .directory
            .get(&(tag, identifier))
            .copied()
            .ok_or_else(|| {
                StackError::CorruptedStack(format!("no {tag} block with identifier {identifier}"))
            })?;
        let found = block::read_block_at(&self.data, offset)?;
        if found.tag != tag {
            return Err(StackError::CorruptedStack(format!(
                "the directory points a {tag} record at a {} block",
                found.tag
            )));
        }
        Ok(found)
    }

    fn background_reader(&self, identifier: u32) -> Result<LayerBlockReader> {
        let found = self.find_block(BACKGROUND_TAG, identifier)?;
        Ok(LayerBlockReader::for_background(found.body, self.version))
    }

    /// Walks the background list in both directions and checks that it
    /// closes into a cycle after backgroundCount steps.
    fn validate_background_cycle(&self) -> Result<()> {
        if self.stack.background_count == 0 {
            return Ok(());
        }
        let first = self.stack.first_background_identifier;
        let mut forward = first;
        let mut backward = first;
        for _ in 0..self.stack.background_count {
            forward = self
                .background_reader(forward)?
                .read_next_background_identifier()?;
            backward = self
                .background_reader(backward)?
                .read_previous_background_identifier()?;
        }
        if forward != first || backward != first {
            return Err(StackError::CorruptedStack(
                "the background list does not close into a cycle".to_owned(),
            ));
        }
        Ok(())
    }

    /// The cards of the stack in file order. Decoded on first access.
    pub fn cards(&self) -> Result<&[Card]> {
        get_or_try_init(&self.cards, || self.read_cards()).map(Vec::as_slice)
    }

    /// The backgrounds of the stack, starting at the first background and
    /// following the list order. Decoded on first access.
    pub fn backgrounds(&self) -> Result<&[Background]> {
        get_or_try_init(&self.backgrounds, || self.read_backgrounds()).map(Vec::as_slice)
    }

    /// The resources of the resource fork, not yet decoded. The list is
    /// empty when the file has no resource fork.
    pub fn resources(&self) -> Result<&[Resource]> {
        get_or_try_init(&self.resources, || {
            resources::list_resources(self.resource_fork.as_ref())
        })
        .map(Vec::as_slice)
    }

    /// The decoded picture of a card or background, by bitmap identifier.
    pub fn bitmap(&self, identifier: u32) -> Result<Arc<MaskedImage>> {
        let mut bitmaps = self
            .bitmaps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(bitmap) = bitmaps.get(&identifier) {
            return Ok(Arc::clone(bitmap));
        }
        let found = self.find_block(BITMAP_TAG, identifier)?;
        let decoded = Arc::new(woba::read_bitmap(&found.body, self.version)?);
        bitmaps.insert(identifier, Arc::clone(&decoded));
        Ok(decoded)
    }

    fn read_cards(&self) -> Result<Vec<Card>> {
        let list_block = self.find_block(LIST_TAG, self.list_identifier)?;
        let list = ListBlockReader::new(list_block.body, self.version);
        if !list.is_checksum_valid()? {
            warn!("The card list checksum does not match");
        }
        let reference_size = list.read_card_reference_size()?;

        let mut cards = Vec::new();
        let mut previous_background = None;
        for page_reference in list.read_page_references()? {
            let page_block = self.find_block(PAGE_TAG, page_reference.identifier)?;
            let page = PageBlockReader::new(
                page_block.body,
                self.version,
                page_reference.card_count,
                reference_size,
            );
            if !page.is_checksum_valid()? {
                warn!(
                    "The checksum of page {} does not match",
                    page_reference.identifier
                );
            }
            for card_reference in page.read_card_references()? {
                cards.push(self.read_card(card_reference, &mut previous_background)?);
            }
        }

        if cards.len() != self.stack.card_count as usize {
            return Err(StackError::CorruptedStack(format!(
                "the card index holds {} cards but the stack declares {}",
                cards.len(),
                self.stack.card_count
            )));
        }
        Ok(cards)
    }

    fn read_card(
        &self,
        reference: CardReference,
        previous_background: &mut Option<u32>,
    ) -> Result<Card> {
        let found = self.find_block(CARD_TAG, reference.identifier)?;
        let reader = LayerBlockReader::for_card(found.body, self.version);

        let background_identifier = reader.read_background_identifier()?;
        let is_start_of_background = *previous_background != Some(background_identifier);
        *previous_background = Some(background_identifier);

        let (parts, background_content_overrides) =
            self.read_layer_parts(&reader, LayerType::Card)?;

        Ok(Card {
            identifier: reader.read_identifier()?,
            background_identifier,
            marked: reference.marked,
            is_start_of_background,
            bitmap_identifier: reader.read_bitmap_identifier()?,
            cant_delete: reader.read_cant_delete()?,
            show_picture: reader.read_show_picture()?,
            dont_search: reader.read_dont_search()?,
            name: reader.read_name()?,
            script: reader.read_script()?,
            parts,
            background_content_overrides,
        })
    }

    fn read_backgrounds(&self) -> Result<Vec<Background>> {
        let mut backgrounds = Vec::with_capacity(self.stack.background_count as usize);
        let mut identifier = self.stack.first_background_identifier;
        let mut total_cards: u64 = 0;
        for _ in 0..self.stack.background_count {
            let background = self.read_background(identifier)?;
            identifier = background.next_background_identifier;
            total_cards += u64::from(background.card_count);
            backgrounds.push(background);
        }
        if total_cards != u64::from(self.stack.card_count) {
            return Err(StackError::CorruptedStack(format!(
                "the backgrounds hold {total_cards} cards but the stack declares {}",
                self.stack.card_count
            )));
        }
        Ok(backgrounds)
    }

    fn read_background(&self, identifier: u32) -> Result<Background> {
        let reader = self.background_reader(identifier)?;
        let (parts, _) = self.read_layer_parts(&reader, LayerType::Background)?;
        Ok(Background {
            identifier: reader.read_identifier()?,
            card_count: reader.read_card_count()?,
            next_background_identifier: reader.read_next_background_identifier()?,
            previous_background_identifier: reader.read_previous_background_identifier()?,
            bitmap_identifier: reader.read_bitmap_identifier()?,
            cant_delete: reader.read_cant_delete()?,
            show_picture: reader.read_show_picture()?,
            dont_search: reader.read_dont_search()?,
            name: reader.read_name()?,
            script: reader.read_script()?,
            parts,
        })
    }

    /// Decodes the parts of a layer block and attaches the contents: those
    /// of the layer itself go to its parts, the others (card-stored text of
    /// background parts) are returned as overrides.
    fn read_layer_parts(
        &self,
        reader: &LayerBlockReader,
        own_layer: LayerType,
    ) -> Result<(Vec<Part>, HashMap<u16, String>)> {
        let mut parts = Vec::new();
        for part_block in reader.extract_part_blocks()? {
            parts.push(layer::read_part(&part_block)?);
        }

        let mut overrides = HashMap::new();
        for content_block in reader.extract_content_blocks()? {
            let content = layer::read_content(&content_block, self.version)?;
            if content.layer_type == own_layer {
                match parts
                    .iter_mut()
                    .find(|part| part.identifier == content.part_identifier)
                {
                    Some(part) => part.content = Some(content.text),
                    None => warn!(
                        "A content block references the unknown part {}",
                        content.part_identifier
                    ),
                }
            } else {
                overrides.insert(content.part_identifier, content.text);
            }
        }
        Ok((parts, overrides))
    }
}

/// Initializes a write-once cell with a fallible computation. When two
/// threads race, both computations succeed over the same immutable input and
/// the first one to finish wins.
fn get_or_try_init<T>(cell: &OnceLock<T>, init: impl FnOnce() -> Result<T>) -> Result<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value))
}
