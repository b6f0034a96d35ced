use std::io::Cursor;

use base64::Engine;
use layout::PanelRect;
use storyboard::{
    is_png, save_original, save_panel, FileSessionStore, Intake, IntakeError, SessionBridge,
    SessionStore, StoryboardPayload, STORYBOARD_KEY,
};

fn panel_b64(color: [u8; 3]) -> String {
    let img = image::RgbImage::from_pixel(8, 6, image::Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
}

fn payload() -> StoryboardPayload {
    StoryboardPayload {
        panels: vec![panel_b64([255, 0, 0]), panel_b64([0, 255, 0]), panel_b64([0, 0, 255])],
        coordinates: vec![
            [0.0, 0.0, 600.0, 400.0],
            [600.0, 0.0, 600.0, 400.0],
            [0.0, 400.0, 1200.0, 400.0],
        ],
        total_size: [1200, 800],
        panel_count: 3,
        original_image: format!("data:image/png;base64,{}", panel_b64([9, 9, 9])),
        n8n_data: Some(serde_json::json!({"run": "abc"})),
        original_prompt: Some("a lighthouse at dusk".to_string()),
        style: Some("manga".to_string()),
        panels_requested: Some(3),
    }
}

#[test]
fn staged_payload_loads_and_exports() {
    let root = tempfile::tempdir().unwrap();
    let store = FileSessionStore::create_in(root.path()).unwrap();
    SessionBridge::stage(&store, &payload()).unwrap();

    let storyboard = match SessionBridge::intake(&store) {
        Intake::Ready(sb) => sb,
        Intake::Redirect(err) => panic!("unexpected redirect: {err}"),
    };
    assert_eq!(storyboard.panel_count(), 3);
    assert_eq!(storyboard.payload.style.as_deref(), Some("manga"));

    let surface = storyboard.layout_surface(0.5);
    assert_eq!(
        surface.layout().initial_positions()[2],
        PanelRect::new(0.0, 200.0, 600.0, 200.0)
    );

    let out = tempfile::tempdir().unwrap();
    for (i, panel) in storyboard.panels.iter().enumerate() {
        let path = save_panel(out.path(), i, panel).unwrap();
        assert!(is_png(&std::fs::read(&path).unwrap()));
    }
    save_original(out.path(), &storyboard.original).unwrap();
    let mut names: Vec<String> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["original_image.png", "panel-1.png", "panel-2.png", "panel-3.png"]
    );
}

#[test]
fn short_coordinates_redirect() {
    let root = tempfile::tempdir().unwrap();
    let store = FileSessionStore::create_in(root.path()).unwrap();
    let mut p = payload();
    p.coordinates.truncate(2);
    store
        .set(STORYBOARD_KEY, &serde_json::to_string(&p).unwrap())
        .unwrap();

    match SessionBridge::intake(&store) {
        Intake::Redirect(IntakeError::CoordinateMismatch {
            panels,
            coordinates,
        }) => assert_eq!((panels, coordinates), (3, 2)),
        other => panic!("expected redirect, got {other:?}"),
    }
}

#[test]
fn missing_required_field_redirects() {
    let root = tempfile::tempdir().unwrap();
    let store = FileSessionStore::create_in(root.path()).unwrap();
    store
        .set(
            STORYBOARD_KEY,
            r#"{"panels": ["aGVsbG8="], "coordinates": [[0, 0, 10, 10]], "panel_count": 1, "original_image": "aGVsbG8="}"#,
        )
        .unwrap();
    assert!(matches!(
        SessionBridge::intake(&store),
        Intake::Redirect(IntakeError::Malformed(_))
    ));
}
