//! End-to-end decoding of synthesized stack data forks.

use byteorder::{BigEndian, ByteOrder};
use hypercard_reader::{StackError, StackFile, UserLevel};

fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    BigEndian::write_u16(&mut bytes[offset..offset + 2], value);
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    BigEndian::write_u32(&mut bytes[offset..offset + 4], value);
}

/// Pads a block to a 32-byte boundary and stamps its header.
fn finish_block(mut bytes: Vec<u8>, tag: &[u8; 4], identifier: u32) -> Vec<u8> {
    let length = bytes.len().next_multiple_of(32).max(0x20);
    bytes.resize(length, 0);
    put_u32(&mut bytes, 0, length as u32);
    bytes[4..8].copy_from_slice(tag);
    put_u32(&mut bytes, 8, identifier);
    bytes
}

/// A version 2 stack block of the minimal valid length, with a balanced
/// checksum.
fn build_stack_block(configure: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x600];
    put_u32(&mut bytes, 0, 0x600);
    bytes[4..8].copy_from_slice(b"STAK");
    put_u32(&mut bytes, 0x8, u32::MAX);
    put_u32(&mut bytes, 0x10, 10);
    configure(&mut bytes);

    let mut sum = 0u32;
    for index in 0..0x180 {
        sum = sum.wrapping_add(BigEndian::read_u32(&bytes[index * 4..]));
    }
    put_u32(&mut bytes, 0x5FC, sum.wrapping_neg());
    bytes
}

/// Concatenates the stack block, a master directory covering `blocks`, and
/// the blocks themselves.
fn assemble(stack_block: Vec<u8>, blocks: Vec<(Vec<u8>, u32)>) -> Vec<u8> {
    let master_length = (0x20 + blocks.len() * 4).next_multiple_of(32);
    let mut master = vec![0u8; 0x20];
    let mut offset = stack_block.len() + master_length;
    for (block, identifier) in &blocks {
        let record = ((offset / 32) as u32) << 8 | (identifier & 0xFF);
        master.extend_from_slice(&record.to_be_bytes());
        offset += block.len();
    }

    let mut fork = stack_block;
    fork.extend(finish_block(master, b"MAST", 0));
    for (block, _) in blocks {
        fork.extend(block);
    }
    fork
}

fn build_list(identifier: u32, total_cards: u32, pages: &[(u32, u16)]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x30];
    put_u32(&mut bytes, 0x10, pages.len() as u32);
    put_u32(&mut bytes, 0x18, total_cards);
    put_u16(&mut bytes, 0x1C, 6);
    let mut checksum = 0u32;
    for &(page, count) in pages {
        checksum = checksum
            .wrapping_add(page)
            .rotate_right(3)
            .wrapping_add(count as u32);
        bytes.extend_from_slice(&page.to_be_bytes());
        bytes.extend_from_slice(&count.to_be_bytes());
    }
    put_u32(&mut bytes, 0x24, checksum);
    finish_block(bytes, b"LIST", identifier)
}

fn build_page(identifier: u32, list_identifier: u32, cards: &[(u32, bool)]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x18];
    put_u32(&mut bytes, 0x10, list_identifier);
    let mut checksum = 0u32;
    for &(card, marked) in cards {
        checksum = checksum.wrapping_add(card).rotate_right(3);
        bytes.extend_from_slice(&card.to_be_bytes());
        bytes.extend_from_slice(&((marked as u16) << 12).to_be_bytes());
    }
    put_u32(&mut bytes, 0x14, checksum);
    finish_block(bytes, b"PAGE", identifier)
}

fn build_button_part(identifier: u16, name: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x1E];
    put_u16(&mut bytes, 0x2, identifier);
    put_u16(&mut bytes, 0x4, 1 << 8);
    put_u16(&mut bytes, 0x6, 10);
    put_u16(&mut bytes, 0x8, 20);
    put_u16(&mut bytes, 0xA, 30);
    put_u16(&mut bytes, 0xC, 40);
    bytes[0xF] = 8;
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);
    bytes.push(0);
    bytes.push(0);
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
    let length = bytes.len() as u16;
    put_u16(&mut bytes, 0, length);
    bytes
}

fn build_content(stored_identifier: i16, text: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&stored_identifier.to_be_bytes());
    bytes.extend_from_slice(&(text.len() as u16 + 1).to_be_bytes());
    bytes.push(0);
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

fn build_card(
    identifier: u32,
    background_identifier: u32,
    parts: &[Vec<u8>],
    contents: &[Vec<u8>],
    name: &str,
) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x36];
    put_u32(&mut bytes, 0x8, identifier);
    put_u32(&mut bytes, 0x24, background_identifier);
    put_u16(&mut bytes, 0x28, parts.len() as u16);
    put_u32(&mut bytes, 0x2C, parts.iter().map(Vec::len).sum::<usize>() as u32);
    put_u16(&mut bytes, 0x30, contents.len() as u16);
    put_u32(&mut bytes, 0x32, contents.iter().map(Vec::len).sum::<usize>() as u32);
    for part in parts {
        bytes.extend_from_slice(part);
    }
    for content in contents {
        bytes.extend_from_slice(content);
    }
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);
    bytes.push(0);
    finish_block(bytes, b"CARD", identifier)
}

fn build_background(identifier: u32, card_count: u32, next: u32, previous: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x32];
    put_u32(&mut bytes, 0x8, identifier);
    put_u32(&mut bytes, 0x18, card_count);
    put_u32(&mut bytes, 0x1C, next);
    put_u32(&mut bytes, 0x20, previous);
    bytes.push(0);
    bytes.push(0);
    finish_block(bytes, b"BKGD", identifier)
}

/// Six cards over three backgrounds, one card carrying a part with its
/// content and a text override for a background part.
fn cards_and_backgrounds_fork() -> Vec<u8> {
    const LIST: u32 = 2000;
    const PAGE: u32 = 3000;

    let stack_block = build_stack_block(|bytes| {
        put_u32(bytes, 0x24, 3);
        put_u32(bytes, 0x28, 2769);
        put_u32(bytes, 0x2C, 6);
        put_u32(bytes, 0x30, 2842);
        put_u32(bytes, 0x34, LIST);
        put_u16(bytes, 0x48, 5);
        put_u32(bytes, 0x74, 2);
    });

    let cards = [
        (2842u32, 2769u32, true),
        (3767, 2769, false),
        (4162, 3887, false),
        (4585, 3887, true),
        (4660, 3887, false),
        (5225, 5065, false),
    ];

    let mut blocks = Vec::new();
    blocks.push((build_list(LIST, 6, &[(PAGE, 6)]), LIST));
    let page_cards: Vec<(u32, bool)> = cards
        .iter()
        .map(|&(identifier, _, marked)| (identifier, marked))
        .collect();
    blocks.push((build_page(PAGE, LIST, &page_cards), PAGE));
    for &(identifier, background, _) in &cards {
        let block = if identifier == 2842 {
            build_card(
                identifier,
                background,
                &[build_button_part(1, "OK")],
                &[build_content(-1, "Hello"), build_content(7, "World")],
                "First",
            )
        } else {
            build_card(identifier, background, &[], &[], "")
        };
        blocks.push((block, identifier));
    }
    blocks.push((build_background(2769, 2, 3887, 5065), 2769));
    blocks.push((build_background(3887, 3, 5065, 2769), 3887));
    blocks.push((build_background(5065, 1, 2769, 3887), 5065));

    assemble(stack_block, blocks)
}

#[test]
fn cards_map_to_their_backgrounds_in_file_order() {
    let file = StackFile::open(cards_and_backgrounds_fork(), None).unwrap();
    let cards = file.cards().unwrap();

    let identifiers: Vec<u32> = cards.iter().map(|card| card.identifier).collect();
    assert_eq!(identifiers, vec![2842, 3767, 4162, 4585, 4660, 5225]);
    let backgrounds: Vec<u32> = cards
        .iter()
        .map(|card| card.background_identifier)
        .collect();
    assert_eq!(backgrounds, vec![2769, 2769, 3887, 3887, 3887, 5065]);
}

#[test]
fn the_first_card_of_each_background_run_starts_it() {
    let file = StackFile::open(cards_and_backgrounds_fork(), None).unwrap();
    let starts: Vec<u32> = file
        .cards()
        .unwrap()
        .iter()
        .filter(|card| card.is_start_of_background)
        .map(|card| card.identifier)
        .collect();
    assert_eq!(starts, vec![2842, 4162, 5225]);
}

#[test]
fn marked_cards_come_from_the_page_flags() {
    let file = StackFile::open(cards_and_backgrounds_fork(), None).unwrap();
    let marked: Vec<bool> = file.cards().unwrap().iter().map(|card| card.marked).collect();
    assert_eq!(marked, vec![true, false, false, true, false, false]);
}

#[test]
fn backgrounds_follow_the_cycle_and_partition_the_cards() {
    let file = StackFile::open(cards_and_backgrounds_fork(), None).unwrap();
    let backgrounds = file.backgrounds().unwrap();
    assert_eq!(backgrounds.len(), 3);

    let first = &backgrounds[0];
    assert_eq!(first.identifier, 2769);
    assert_eq!(first.card_count, 2);
    assert_eq!(first.next_background_identifier, 3887);
    assert_eq!(first.previous_background_identifier, 5065);

    let total: u32 = backgrounds.iter().map(|background| background.card_count).sum();
    assert_eq!(total, file.stack().card_count);
}

#[test]
fn part_contents_attach_to_their_parts() {
    let file = StackFile::open(cards_and_backgrounds_fork(), None).unwrap();
    let card = &file.cards().unwrap()[0];

    assert_eq!(card.name, "First");
    assert_eq!(card.parts.len(), 1);
    let part = &card.parts[0];
    assert_eq!(part.identifier, 1);
    assert_eq!(part.name, "OK");
    assert_eq!(part.content.as_deref(), Some("Hello"));

    assert_eq!(
        card.background_content_overrides.get(&7).map(String::as_str),
        Some("World")
    );
}

#[test]
fn stack_properties_come_from_the_header() {
    let file = StackFile::open(cards_and_backgrounds_fork(), None).unwrap();
    let stack = file.stack();
    assert_eq!(stack.card_count, 6);
    assert_eq!(stack.background_count, 3);
    assert_eq!(stack.marked_card_count, 2);
    assert_eq!(stack.user_level, UserLevel::Script);
    assert_eq!(stack.size.width, 512);
    assert_eq!(stack.size.height, 342);
    assert!(stack.version_at_creation.is_none());
    assert!(!stack.private_access);
}

#[test]
fn stray_high_bits_in_rectangles_are_masked() {
    let stack_block = build_stack_block(|bytes| {
        put_u16(bytes, 0x78, 0x8000);
        put_u16(bytes, 0x7A, 0x8000);
        put_u16(bytes, 0x7C, 0x8156);
        put_u16(bytes, 0x7E, 0x8200);
    });
    let file = StackFile::open(assemble(stack_block, Vec::new()), None).unwrap();
    let window = file.stack().window_rectangle;
    assert_eq!(window.top, 0);
    assert_eq!(window.left, 0);
    assert_eq!(window.bottom, 0x156);
    assert_eq!(window.right, 0x200);
}

#[test]
fn a_private_access_stack_requires_a_password() {
    let stack_block = build_stack_block(|bytes| {
        put_u16(bytes, 0x4C, 1 << 13);
    });
    let fork = assemble(stack_block, Vec::new());

    assert!(matches!(
        StackFile::open(fork.clone(), None),
        Err(StackError::MissingPassword)
    ));
    assert!(matches!(
        StackFile::open_with_password(fork, None, "guess"),
        Err(StackError::WrongPassword)
    ));
}

#[test]
fn a_card_count_mismatch_is_a_corrupt_stack() {
    let mut fork = cards_and_backgrounds_fork();
    // Claim one card more than the index holds.
    put_u32(&mut fork, 0x2C, 7);
    let mut sum = 0u32;
    for index in 0..0x180 {
        sum = sum.wrapping_add(BigEndian::read_u32(&fork[index * 4..]));
    }
    let balanced = BigEndian::read_u32(&fork[0x5FC..]).wrapping_sub(sum);
    put_u32(&mut fork, 0x5FC, balanced);

    let file = StackFile::open(fork, None).unwrap();
    assert!(matches!(
        file.cards(),
        Err(StackError::CorruptedStack(_))
    ));
}

#[test]
fn a_broken_background_cycle_fails_at_open() {
    const LIST: u32 = 2000;
    let stack_block = build_stack_block(|bytes| {
        put_u32(bytes, 0x24, 2);
        put_u32(bytes, 0x28, 100);
        put_u32(bytes, 0x34, LIST);
    });
    let blocks = vec![
        (build_background(100, 0, 200, 200), 100),
        // The second background points back to itself instead of closing
        // the cycle.
        (build_background(200, 0, 200, 200), 200),
    ];
    assert!(matches!(
        StackFile::open(assemble(stack_block, blocks), None),
        Err(StackError::CorruptedStack(_))
    ));
}

#[test]
fn a_missing_master_block_fails_at_open() {
    let fork = build_stack_block(|_| ());
    assert!(matches!(
        StackFile::open(fork, None),
        Err(StackError::OutOfRange { .. })
    ));
}
