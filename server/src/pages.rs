//! Static pages served next to the stream.

/// Landing page for a normal browser: embeds the OBS view.
pub const LANDING_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>frame-relay</title>
<meta name="viewport" content="width=device-width,initial-scale=1">
<style>
body{background:#121212;color:#fff;font-family:sans-serif;display:flex;flex-direction:column;align-items:center;justify-content:center;height:100vh;margin:0}
h1{margin-bottom:20px}
iframe{border:none;max-width:100%}
.info{margin-top:20px;color:#888}
</style>
</head>
<body>
<h1>Live camera</h1>
<iframe src="/obs" width="640" height="480"></iframe>
<p class="info">Raw stream: <a href="/stream">/stream</a> &middot; OBS browser source: <a href="/obs">/obs</a></p>
</body>
</html>
"#;

/// Full-bleed page for OBS browser sources. Reloads the stream when the
/// image errors and, every 2s, when `/ping` fails and the image is broken.
pub const OBS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>frame-relay OBS</title>
<style>
body,html{margin:0;padding:0;width:100%;height:100%;background-color:#000;overflow:hidden}
img{width:100%;height:100%;object-fit:contain;display:block}
</style>
</head>
<body>
<img id="cam"/>
<script>
const img = document.getElementById('cam');
function loadStream() { img.src = "/stream?t=" + Date.now(); }
img.onerror = function () { setTimeout(loadStream, 500); };
setInterval(function () {
  fetch('/ping')
    .then(function (res) { if (!res.ok) throw new Error('ping failed'); })
    .catch(function () { if (!(img.complete && img.naturalWidth !== 0)) loadStream(); });
}, 2000);
loadStream();
</script>
</body>
</html>
"#;
