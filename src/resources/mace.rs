//! MACE (Macintosh Audio Compression/Expansion) adaptive decoding.
//!
//! MACE packs samples in 3-bit and 2-bit codes. The decoder keeps a small
//! adaptive state per channel: a quantizer index driven by the codes, a
//! smoothed level, and for 6:1 a gain factor used to predict two output
//! samples per code.

/// The two MACE expansion ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ratio {
    /// One byte expands to 3 samples.
    ThreeToOne,
    /// One byte expands to 6 samples.
    SixToOne,
}

#[derive(Debug, Default)]
struct ChannelState {
    index: i32,
    level: i32,
    factor: i32,
    prev2: i32,
    previous: i32,
}

/// Index adjustments for 3-bit codes.
const INDEX_ADJUST_3: [i16; 8] = [-13, 8, 76, 222, 222, 76, 8, -13];
/// Index adjustments for 2-bit codes.
const INDEX_ADJUST_2: [i16; 4] = [-18, 140, 140, -18];

/// Quantizer values for 3-bit codes, 4 positive magnitudes per row.
/// Rows are selected by bits 4..11 of the adaptive index; negative codes
/// mirror the magnitudes around -1.
#[rustfmt::skip]
const VALUE_TABLE_4: [[i16; 4]; 128] = [
    [37, 116, 206, 330], [39, 121, 216, 346],
    [41, 127, 225, 361], [42, 132, 235, 377],
    [44, 137, 245, 392], [46, 144, 256, 410],
    [48, 150, 267, 428], [51, 157, 280, 449],
    [53, 165, 293, 470], [55, 172, 306, 490],
    [58, 179, 319, 511], [60, 187, 333, 534],
    [63, 195, 348, 557], [66, 205, 364, 583],
    [69, 214, 380, 609], [72, 223, 396, 635],
    [75, 233, 414, 663], [79, 244, 433, 694],
    [82, 254, 453, 725], [86, 265, 472, 756],
    [90, 278, 495, 792], [94, 290, 516, 826],
    [98, 303, 538, 862], [102, 316, 562, 901],
    [107, 331, 588, 942], [112, 345, 614, 983],
    [117, 361, 641, 1027], [122, 377, 670, 1074],
    [127, 394, 701, 1123], [133, 411, 732, 1172],
    [139, 430, 764, 1224], [145, 449, 799, 1280],
    [151, 469, 835, 1336], [159, 491, 874, 1399],
    [165, 511, 914, 1461], [173, 534, 952, 1524],
    [181, 560, 999, 1596], [189, 584, 1041, 1665],
    [197, 610, 1086, 1738], [205, 636, 1134, 1816],
    [215, 666, 1186, 1899], [226, 695, 1239, 1981],
    [236, 727, 1293, 2070], [246, 759, 1352, 2165],
    [256, 793, 1414, 2264], [268, 828, 1477, 2362],
    [280, 866, 1542, 2467], [292, 904, 1612, 2580],
    [304, 944, 1685, 2693], [320, 989, 1763, 2820],
    [332, 1029, 1844, 2945], [348, 1075, 1921, 3072],
    [365, 1128, 2016, 3217], [381, 1176, 2100, 3356],
    [397, 1228, 2191, 3503], [413, 1281, 2288, 3661],
    [433, 1341, 2393, 3828], [455, 1399, 2500, 3993],
    [475, 1464, 2609, 4173], [495, 1528, 2728, 4364],
    [516, 1597, 2853, 4564], [540, 1667, 2980, 4761],
    [564, 1744, 3111, 4973], [588, 1820, 3252, 5201],
    [612, 1901, 3400, 5428], [644, 1991, 3557, 5684],
    [669, 2072, 3721, 5936], [701, 2164, 3876, 6192],
    [735, 2271, 4068, 6485], [767, 2368, 4237, 6765],
    [800, 2473, 4421, 7061], [832, 2579, 4616, 7380],
    [872, 2700, 4828, 7716], [916, 2817, 5044, 8049],
    [957, 2948, 5264, 8412], [997, 3077, 5504, 8797],
    [1039, 3215, 5756, 9200], [1088, 3356, 6013, 9597],
    [1136, 3511, 6277, 10024], [1184, 3664, 6561, 10484],
    [1232, 3828, 6860, 10941], [1297, 4009, 7177, 11458],
    [1347, 4172, 7508, 11965], [1412, 4357, 7821, 12482],
    [1480, 4573, 8208, 13072], [1545, 4768, 8549, 13637],
    [1611, 4979, 8920, 14233], [1676, 5193, 9314, 14876],
    [1756, 5436, 9741, 15554], [1845, 5672, 10177, 16225],
    [1927, 5936, 10621, 16956], [2008, 6195, 11105, 17733],
    [2092, 6473, 11614, 18545], [2191, 6757, 12132, 19345],
    [2288, 7069, 12665, 20206], [2384, 7377, 13238, 21133],
    [2481, 7707, 13841, 22054], [2612, 8072, 14481, 23096],
    [2713, 8400, 15149, 24118], [2844, 8773, 15780, 25161],
    [2981, 9208, 16561, 26350], [3111, 9600, 17249, 27489],
    [3244, 10025, 17998, 28690], [3375, 10456, 18793, 29986],
    [3536, 10945, 19654, 31353], [3716, 11420, 20534, 32706],
    [3881, 11952, 21430, 32767], [4044, 12473, 22406, 32767],
    [4213, 13033, 23433, 32767], [4412, 13605, 24478, 32767],
    [4608, 14233, 25554, 32767], [4801, 14853, 26710, 32767],
    [4996, 15518, 27927, 32767], [5260, 16253, 29218, 32767],
    [5464, 16913, 30566, 32767], [5728, 17664, 31839, 32767],
    [6003, 18540, 32767, 32767], [6265, 19329, 32767, 32767],
    [6533, 20185, 32767, 32767], [6797, 21053, 32767, 32767],
    [7121, 22037, 32767, 32767], [7484, 22994, 32767, 32767],
    [7816, 24065, 32767, 32767], [8144, 25114, 32767, 32767],
    [8485, 26241, 32767, 32767], [8885, 27393, 32767, 32767],
    [9280, 28657, 32767, 32767], [9669, 29906, 32767, 32767],
];

/// Quantizer values for 2-bit codes.
#[rustfmt::skip]
const VALUE_TABLE_2: [[i16; 2]; 128] = [
    [64, 216], [67, 226], [70, 236], [74, 246],
    [77, 257], [80, 268], [84, 280], [88, 294],
    [92, 307], [96, 321], [100, 334], [104, 350],
    [109, 365], [114, 382], [119, 399], [124, 416],
    [130, 434], [136, 454], [142, 475], [148, 495],
    [155, 519], [162, 541], [169, 564], [176, 590],
    [185, 617], [193, 644], [201, 673], [210, 703],
    [220, 735], [230, 767], [240, 801], [251, 838],
    [263, 874], [275, 915], [287, 957], [300, 997],
    [314, 1045], [328, 1090], [342, 1136], [356, 1189],
    [374, 1243], [391, 1297], [407, 1356], [425, 1416],
    [445, 1481], [466, 1545], [486, 1614], [508, 1688],
    [532, 1761], [557, 1843], [581, 1928], [607, 2008],
    [636, 2105], [664, 2196], [692, 2288], [721, 2395],
    [757, 2504], [791, 2613], [824, 2732], [860, 2852],
    [901, 2983], [943, 3112], [984, 3251], [1028, 3400],
    [1077, 3547], [1127, 3713], [1176, 3884], [1229, 4045],
    [1287, 4240], [1344, 4424], [1401, 4609], [1459, 4825],
    [1532, 5044], [1601, 5264], [1668, 5503], [1741, 5745],
    [1824, 6009], [1909, 6269], [1992, 6549], [2081, 6849],
    [2180, 7145], [2281, 7480], [2380, 7824], [2488, 8148],
    [2605, 8541], [2721, 8912], [2836, 9284], [2953, 9720],
    [3101, 10161], [3241, 10604], [3376, 11085], [3524, 11573],
    [3692, 12105], [3864, 12628], [4032, 13192], [4212, 13797],
    [4413, 14393], [4617, 15068], [4818, 15761], [5036, 16414],
    [5273, 17205], [5508, 17953], [5741, 18702], [5977, 19580],
    [6277, 20469], [6560, 21361], [6834, 22330], [7133, 23313],
    [7473, 24385], [7821, 25438], [8162, 26574], [8526, 27793],
    [8933, 28994], [9346, 30353], [9753, 31749], [10194, 32767],
    [10674, 32767], [11149, 32767], [11621, 32767], [12099, 32767],
    [12706, 32767], [13279, 32767], [13833, 32767], [14439, 32767],
    [15127, 32767], [15831, 32767], [16521, 32767], [17258, 32767],
];

/// The historical decoder clamps asymmetrically: the lowest value it can
/// produce is -32767, and exactly -32768 passes through unchanged.
fn broken_clip(n: i32) -> i32 {
    if n > 32767 {
        32767
    } else if n < -32768 {
        -32767
    } else {
        n
    }
}

/// Widens an internal value to a 16-bit sample the way the original did:
/// the high byte is duplicated into the low byte.
fn widen(n: i32) -> i16 {
    ((n & 0xFF00) | ((n >> 8) & 0xFF)) as u16 as i16
}

impl ChannelState {
    /// Looks up the quantizer value for a code and adapts the index. Codes
    /// in the upper half of the range mirror to negative values.
    fn read_value(&mut self, code: u8, wide: bool) -> i32 {
        let row = ((self.index & 0x7F0) >> 4) as usize;
        let code = code as usize;
        let current = if wide {
            let table = &VALUE_TABLE_4[row];
            if code < 4 {
                table[code] as i32
            } else {
                -1 - table[7 - code] as i32
            }
        } else {
            let table = &VALUE_TABLE_2[row];
            if code < 2 {
                table[code] as i32
            } else {
                -1 - table[3 - code] as i32
            }
        };

        let adjust = if wide {
            INDEX_ADJUST_3[code & 7]
        } else {
            INDEX_ADJUST_2[code & 3]
        };
        self.index += adjust as i32 - (self.index >> 5);
        if self.index < 0 {
            self.index = 0;
        }
        current
    }

    /// Decodes one 3:1 code to one sample.
    fn chomp3(&mut self, code: u8, wide: bool) -> i16 {
        let current = broken_clip(self.read_value(code, wide) + self.level);
        self.level = current - (current >> 3);
        widen(current)
    }

    /// Decodes one 6:1 code to two samples, predicting them from the two
    /// previous internal values.
    fn chomp6(&mut self, code: u8, wide: bool) -> [i16; 2] {
        let current = self.read_value(code, wide);

        if (self.previous ^ current) >= 0 {
            self.factor = (self.factor + 506).min(32767);
        } else {
            self.factor = (self.factor - 314).max(-32768);
        }

        let current = broken_clip(current + self.level);
        self.level = (current * self.factor) >> 15;
        let current = current >> 1;

        let out = [
            widen(self.previous + self.prev2 - ((self.prev2 - current) >> 2)),
            widen(self.previous + current + ((self.prev2 - current) >> 2)),
        ];
        self.prev2 = self.previous;
        self.previous = current;
        out
    }
}

/// Expands MACE-compressed bytes, keeping only channel 0 of an interleaved
/// stream. `packet_limit` bounds the number of bytes decoded per channel;
/// a short body yields a short output rather than a failure.
pub fn expand(data: &[u8], channel_count: usize, packet_limit: usize, ratio: Ratio) -> Vec<i16> {
    if channel_count == 0 {
        return Vec::new();
    }
    let packets = (data.len() / channel_count).min(packet_limit);
    let mut state = ChannelState::default();
    let mut samples = Vec::with_capacity(packets * 6);

    for packet_index in 0..packets {
        let packet = data[packet_index * channel_count];
        match ratio {
            Ratio::ThreeToOne => {
                samples.push(state.chomp3(packet & 7, true));
                samples.push(state.chomp3((packet >> 3) & 3, false));
                samples.push(state.chomp3(packet >> 5, true));
            }
            Ratio::SixToOne => {
                samples.extend(state.chomp6(packet >> 5, true));
                samples.extend(state.chomp6((packet >> 3) & 3, false));
                samples.extend(state.chomp6(packet & 7, true));
            }
        }
    }
    samples
}
