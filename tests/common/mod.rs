#![allow(dead_code)]

use std::fs;
use std::path::Path;

/// A 24-bit uncompressed BMP whose pixel bytes are all `fill`.
///
/// Different `fill` values give byte-distinct files, so the helper doubles
/// as a way to create (non-)duplicates.
pub fn bmp_bytes(width: u32, height: u32, fill: u8) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, fill);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32, fill: u8) {
    write_file(path, bmp_bytes(width, height, fill));
}

pub fn write_file(path: &Path, contents: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, contents).expect("write file");
}

/// A YOLO dataset with `data.yaml` names and one label file per image.
///
/// Each entry is `(image stem, pixel fill, label file contents)`.
pub fn write_yolo_dataset(root: &Path, names: &[&str], images: &[(&str, u8, &str)]) {
    let names_yaml = names
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ");
    write_file(
        &root.join("data.yaml"),
        format!("nc: {}\nnames: [{}]\n", names.len(), names_yaml),
    );
    for (stem, fill, labels) in images {
        write_bmp(&root.join(format!("images/{stem}.bmp")), 32, 32, *fill);
        write_file(&root.join(format!("labels/{stem}.txt")), labels);
    }
}

/// A VOC dataset with one object per image.
///
/// Each entry is `(image stem, pixel fill, class name)`; boxes cover the
/// centre of a 40x20 image.
pub fn write_voc_dataset(root: &Path, images: &[(&str, u8, &str)]) {
    for (stem, fill, class) in images {
        write_bmp(&root.join(format!("JPEGImages/{stem}.bmp")), 40, 20, *fill);
        write_file(
            &root.join(format!("Annotations/{stem}.xml")),
            format!(
                r#"<annotation>
  <filename>{stem}.bmp</filename>
  <size><width>40</width><height>20</height><depth>3</depth></size>
  <object>
    <name>{class}</name>
    <bndbox><xmin>10</xmin><ymin>5</ymin><xmax>30</xmax><ymax>15</ymax></bndbox>
  </object>
</annotation>
"#
            ),
        );
    }
}

/// A COCO dataset with a single `annotations.json` and one box per image.
///
/// Each entry is `(image stem, pixel fill, category name)`.
pub fn write_coco_dataset(root: &Path, images: &[(&str, u8, &str)]) {
    let mut categories: Vec<&str> = images.iter().map(|(_, _, class)| *class).collect();
    categories.sort_unstable();
    categories.dedup();

    let mut image_json = Vec::new();
    let mut annotation_json = Vec::new();
    for (index, (stem, fill, class)) in images.iter().enumerate() {
        write_bmp(&root.join(format!("images/{stem}.bmp")), 64, 48, *fill);
        let category_id = categories
            .iter()
            .position(|name| name == class)
            .expect("category listed")
            + 1;
        image_json.push(serde_json::json!({
            "id": index + 1,
            "file_name": format!("{stem}.bmp"),
            "width": 64,
            "height": 48,
        }));
        annotation_json.push(serde_json::json!({
            "id": index + 1,
            "image_id": index + 1,
            "category_id": category_id,
            "bbox": [8.0, 8.0, 16.0, 16.0],
        }));
    }
    let category_json: Vec<_> = categories
        .iter()
        .enumerate()
        .map(|(index, name)| serde_json::json!({"id": index + 1, "name": name}))
        .collect();

    let doc = serde_json::json!({
        "images": image_json,
        "annotations": annotation_json,
        "categories": category_json,
    });
    write_file(
        &root.join("annotations.json"),
        serde_json::to_string_pretty(&doc).expect("serialize coco"),
    );
}
